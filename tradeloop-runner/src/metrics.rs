//! Performance analysis over the closed-trade log.
//!
//! Everything here is a pure function of the trades, the starting capital
//! and the session length. Ratios are fractions (0.55 = 55%); the report
//! renders them as percentages.

use std::fmt::Write as _;

use serde::{Deserialize, Serialize};
use tradeloop_core::domain::TradeRecord;

/// Profit factor reported when there are winners and no losers.
pub const PROFIT_FACTOR_CAP: f64 = 100.0;

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PerformanceSnapshot {
    pub total_pnl: f64,
    pub total_pnl_pct: f64,
    pub total_trades: usize,
    pub winning_trades: usize,
    /// Trades with negative PnL; break-even trades are neither.
    pub losing_trades: usize,
    pub break_even_trades: usize,
    pub win_rate: f64,
    pub avg_win: f64,
    pub avg_loss: f64,
    pub profit_factor: f64,
    /// Mean over standard deviation of per-trade PnL, not annualized.
    pub sharpe: f64,
    pub max_drawdown: f64,
    pub max_drawdown_pct: f64,
    pub recovery_factor: f64,
    pub avg_duration_minutes: f64,
    pub trades_per_hour: f64,
    pub best_trade: f64,
    pub worst_trade: f64,
    pub max_consecutive_wins: usize,
    pub max_consecutive_losses: usize,
}

impl PerformanceSnapshot {
    pub fn compute(trades: &[TradeRecord], start_capital: f64, session_minutes: f64) -> Self {
        if trades.is_empty() {
            return Self::default();
        }
        let pnls: Vec<f64> = trades.iter().map(|t| t.pnl).collect();
        let wins: Vec<f64> = pnls.iter().copied().filter(|p| *p > 0.0).collect();
        let losses: Vec<f64> = pnls.iter().copied().filter(|p| *p < 0.0).collect();
        let total_pnl: f64 = pnls.iter().sum();
        let (max_drawdown, max_drawdown_pct) = max_drawdown(&capital_path(start_capital, &pnls));

        Self {
            total_pnl,
            total_pnl_pct: if start_capital > 0.0 {
                total_pnl / start_capital
            } else {
                0.0
            },
            total_trades: trades.len(),
            winning_trades: wins.len(),
            losing_trades: losses.len(),
            break_even_trades: trades.len() - wins.len() - losses.len(),
            win_rate: wins.len() as f64 / trades.len() as f64,
            avg_win: mean(&wins),
            avg_loss: mean(&losses),
            profit_factor: profit_factor(&wins, &losses),
            sharpe: sharpe(&pnls),
            max_drawdown,
            max_drawdown_pct,
            recovery_factor: if max_drawdown > 0.0 {
                total_pnl / max_drawdown
            } else {
                0.0
            },
            avg_duration_minutes: mean(
                &trades
                    .iter()
                    .map(|t| t.duration().num_seconds() as f64 / 60.0)
                    .collect::<Vec<_>>(),
            ),
            trades_per_hour: if session_minutes > 0.0 {
                trades.len() as f64 / session_minutes * 60.0
            } else {
                0.0
            },
            best_trade: pnls.iter().copied().fold(f64::MIN, f64::max),
            worst_trade: pnls.iter().copied().fold(f64::MAX, f64::min),
            max_consecutive_wins: max_streak(&pnls, |p| p > 0.0),
            max_consecutive_losses: max_streak(&pnls, |p| p < 0.0),
        }
    }

    pub fn end_capital(&self, start_capital: f64) -> f64 {
        start_capital + self.total_pnl
    }
}

/// Starting capital followed by the capital after each trade.
pub fn capital_path(start_capital: f64, pnls: &[f64]) -> Vec<f64> {
    let mut path = Vec::with_capacity(pnls.len() + 1);
    let mut capital = start_capital;
    path.push(capital);
    for pnl in pnls {
        capital += pnl;
        path.push(capital);
    }
    path
}

/// Largest peak-to-trough decline as (absolute, fraction of peak).
pub fn max_drawdown(path: &[f64]) -> (f64, f64) {
    let Some(&first) = path.first() else {
        return (0.0, 0.0);
    };
    let mut peak = first;
    let mut worst = (0.0, 0.0);
    for &capital in path {
        peak = peak.max(capital);
        let dd = peak - capital;
        if dd > worst.0 {
            worst = (dd, if peak > 0.0 { dd / peak } else { 0.0 });
        }
    }
    worst
}

/// Gross profit over gross loss, capped at [`PROFIT_FACTOR_CAP`].
pub fn profit_factor(wins: &[f64], losses: &[f64]) -> f64 {
    let gross_profit: f64 = wins.iter().sum();
    let gross_loss: f64 = losses.iter().map(|l| l.abs()).sum();
    if gross_loss < 1e-10 {
        return if gross_profit > 0.0 { PROFIT_FACTOR_CAP } else { 0.0 };
    }
    (gross_profit / gross_loss).min(PROFIT_FACTOR_CAP)
}

/// Population standard deviation, matching the per-trade Sharpe convention.
pub fn sharpe(pnls: &[f64]) -> f64 {
    if pnls.len() < 2 {
        return 0.0;
    }
    let m = mean(pnls);
    let var = pnls.iter().map(|p| (p - m).powi(2)).sum::<f64>() / pnls.len() as f64;
    let sd = var.sqrt();
    if sd < 1e-15 {
        0.0
    } else {
        m / sd
    }
}

fn mean(values: &[f64]) -> f64 {
    if values.is_empty() {
        return 0.0;
    }
    values.iter().sum::<f64>() / values.len() as f64
}

fn max_streak(pnls: &[f64], pred: impl Fn(f64) -> bool) -> usize {
    let mut best = 0;
    let mut current = 0;
    for &p in pnls {
        if pred(p) {
            current += 1;
            best = best.max(current);
        } else {
            current = 0;
        }
    }
    best
}

fn grade(value: f64, excellent: f64, good: f64, acceptable: f64) -> &'static str {
    if value > excellent {
        "excellent"
    } else if value > good {
        "good"
    } else if value > acceptable {
        "acceptable"
    } else {
        "poor"
    }
}

/// Plain-text session report.
pub fn render_report(snapshot: &PerformanceSnapshot, start_capital: f64) -> String {
    let s = snapshot;
    let mut out = String::new();
    let rule = "=".repeat(60);

    // Writing into a String cannot fail.
    let _ = writeln!(out, "{rule}");
    let _ = writeln!(out, "PERFORMANCE REPORT");
    let _ = writeln!(out, "{rule}");
    let _ = writeln!(out, "P&L");
    let _ = writeln!(out, "  start capital      {start_capital:>12.2}");
    let _ = writeln!(out, "  end capital        {:>12.2}", s.end_capital(start_capital));
    let _ = writeln!(out, "  total pnl          {:>12.2} ({:+.2}%)", s.total_pnl, s.total_pnl_pct * 100.0);
    if s.total_trades == 0 {
        let _ = writeln!(out, "\nno closed trades");
        let _ = writeln!(out, "{rule}");
        return out;
    }
    let _ = writeln!(out, "  best trade         {:>12.2}", s.best_trade);
    let _ = writeln!(out, "  worst trade        {:>12.2}", s.worst_trade);
    let _ = writeln!(out, "\nWIN/LOSS");
    let _ = writeln!(out, "  trades             {:>12}", s.total_trades);
    let _ = writeln!(out, "  winners            {:>12} ({:.1}%)", s.winning_trades, s.win_rate * 100.0);
    let _ = writeln!(out, "  losers             {:>12}", s.losing_trades);
    if s.break_even_trades > 0 {
        let _ = writeln!(out, "  break-even         {:>12}", s.break_even_trades);
    }
    let _ = writeln!(out, "  avg win            {:>12.2}", s.avg_win);
    let _ = writeln!(out, "  avg loss           {:>12.2}", s.avg_loss);
    if s.avg_loss != 0.0 {
        let _ = writeln!(out, "  win/loss ratio     {:>12.2}", (s.avg_win / s.avg_loss).abs());
    }
    let _ = writeln!(out, "\nQUALITY");
    let _ = writeln!(
        out,
        "  profit factor      {:>12.2}  {}",
        s.profit_factor,
        grade(s.profit_factor, 2.0, 1.5, 1.0)
    );
    let _ = writeln!(out, "  sharpe (per trade) {:>12.2}  {}", s.sharpe, grade(s.sharpe, 2.0, 1.0, 0.5));
    let _ = writeln!(
        out,
        "  max drawdown       {:>12.2} ({:.2}%)",
        s.max_drawdown,
        s.max_drawdown_pct * 100.0
    );
    let _ = writeln!(out, "  recovery factor    {:>12.2}", s.recovery_factor);
    let _ = writeln!(out, "\nACTIVITY");
    let _ = writeln!(out, "  avg duration (min) {:>12.1}", s.avg_duration_minutes);
    let _ = writeln!(out, "  trades per hour    {:>12.2}", s.trades_per_hour);
    let _ = writeln!(out, "  max win streak     {:>12}", s.max_consecutive_wins);
    let _ = writeln!(out, "  max loss streak    {:>12}", s.max_consecutive_losses);
    let _ = writeln!(out, "{rule}");
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone, Utc};
    use tradeloop_core::domain::{CloseReason, Position, PositionSide};
    use tradeloop_core::risk::TradeStats;

    // ────────────────────────────────────────────────────────────────
    // Helpers
    // ────────────────────────────────────────────────────────────────

    fn trade(idx: i64, pnl: f64, minutes: i64) -> TradeRecord {
        let opened = Utc.with_ymd_and_hms(2024, 1, 2, 9, 0, 0).unwrap() + Duration::hours(idx);
        let position = Position::from_fill("BTCUSDT", PositionSide::Long, 100.0, 1.0, 0.01, 0.02, opened);
        TradeRecord::close(&position, 100.0 + pnl, opened + Duration::minutes(minutes), CloseReason::SignalReversal)
    }

    fn assert_close(a: f64, b: f64) {
        assert!((a - b).abs() < 1e-9, "{a} != {b}");
    }

    // ────────────────────────────────────────────────────────────────
    // Tests
    // ────────────────────────────────────────────────────────────────

    #[test]
    fn empty_log_is_all_zero() {
        let s = PerformanceSnapshot::compute(&[], 1000.0, 60.0);
        assert_eq!(s, PerformanceSnapshot::default());
        assert!(render_report(&s, 1000.0).contains("no closed trades"));
    }

    #[test]
    fn aggregates_mixed_trades() {
        let trades = vec![trade(0, 10.0, 30), trade(1, -5.0, 10), trade(2, 20.0, 20), trade(3, -5.0, 20)];
        let s = PerformanceSnapshot::compute(&trades, 1000.0, 120.0);

        assert_close(s.total_pnl, 20.0);
        assert_close(s.total_pnl_pct, 0.02);
        assert_eq!(s.total_trades, 4);
        assert_eq!(s.winning_trades, 2);
        assert_eq!(s.losing_trades, 2);
        assert_close(s.win_rate, 0.5);
        assert_close(s.avg_win, 15.0);
        assert_close(s.avg_loss, -5.0);
        assert_close(s.profit_factor, 3.0);
        assert_close(s.avg_duration_minutes, 20.0);
        assert_close(s.trades_per_hour, 2.0);
        assert_close(s.best_trade, 20.0);
        assert_close(s.worst_trade, -5.0);
        assert_eq!(s.max_consecutive_wins, 1);
        assert_eq!(s.max_consecutive_losses, 1);
    }

    #[test]
    fn drawdown_follows_capital_path() {
        // 1000 -> 1010 -> 1000 -> 990 -> 1030
        let trades = vec![trade(0, 10.0, 5), trade(1, -10.0, 5), trade(2, -10.0, 5), trade(3, 40.0, 5)];
        let s = PerformanceSnapshot::compute(&trades, 1000.0, 0.0);
        assert_close(s.max_drawdown, 20.0);
        assert_close(s.max_drawdown_pct, 20.0 / 1010.0);
        assert_close(s.recovery_factor, 30.0 / 20.0);
        assert_eq!(s.max_consecutive_losses, 2);
        assert_eq!(s.trades_per_hour, 0.0);
    }

    #[test]
    fn all_winners_cap_profit_factor() {
        let trades = vec![trade(0, 5.0, 5), trade(1, 7.0, 5)];
        let s = PerformanceSnapshot::compute(&trades, 1000.0, 60.0);
        assert_eq!(s.profit_factor, PROFIT_FACTOR_CAP);
        assert_eq!(s.max_drawdown, 0.0);
        assert_eq!(s.recovery_factor, 0.0);
        assert_eq!(s.max_consecutive_wins, 2);
    }

    #[test]
    fn break_even_is_neither_win_nor_loss() {
        let s = PerformanceSnapshot::compute(&[trade(0, 0.0, 5)], 1000.0, 60.0);
        assert_eq!(s.winning_trades, 0);
        assert_eq!(s.losing_trades, 0);
        assert_eq!(s.break_even_trades, 1);
        assert_eq!(s.win_rate, 0.0);
        assert_eq!(s.profit_factor, 0.0);
        assert_eq!(s.max_consecutive_losses, 0);
        assert!(render_report(&s, 1000.0).contains("break-even"));
    }

    #[test]
    fn break_even_interrupts_a_losing_streak() {
        let trades = vec![trade(0, -5.0, 5), trade(1, 0.0, 5), trade(2, -5.0, 5)];
        let s = PerformanceSnapshot::compute(&trades, 1000.0, 60.0);
        assert_eq!(s.losing_trades, 2);
        assert_eq!(s.max_consecutive_losses, 1);
        assert_close(s.avg_loss, -5.0);
    }

    #[test]
    fn win_loss_counts_agree_with_sizing_stats() {
        let trades = vec![
            trade(0, 10.0, 5),
            trade(1, 0.0, 5),
            trade(2, -4.0, 5),
            trade(3, 0.0, 5),
            trade(4, 6.0, 5),
        ];
        let s = PerformanceSnapshot::compute(&trades, 1000.0, 60.0);
        let stats = TradeStats::from_trades(&trades);
        assert_eq!(s.winning_trades, stats.wins);
        assert_eq!(s.losing_trades, stats.losses);
        assert_close(s.win_rate, stats.win_rate);
        assert_close(s.avg_loss, -stats.avg_loss);
        assert_eq!(s.break_even_trades, 2);
    }

    #[test]
    fn sharpe_is_mean_over_population_std() {
        assert_close(sharpe(&[1.0, 3.0]), 2.0);
        assert_eq!(sharpe(&[2.0, 2.0, 2.0]), 0.0);
        assert_eq!(sharpe(&[5.0]), 0.0);
    }

    #[test]
    fn report_lists_key_figures() {
        let trades = vec![trade(0, 10.0, 30), trade(1, -5.0, 10)];
        let s = PerformanceSnapshot::compute(&trades, 1000.0, 60.0);
        let report = render_report(&s, 1000.0);
        assert!(report.contains("PERFORMANCE REPORT"));
        assert!(report.contains("1005.00"));
        assert!(report.contains("profit factor"));
        assert!(report.contains("(+0.50%)"));
    }
}
