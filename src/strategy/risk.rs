//! Execution gating and position sizing.

use crate::config::schema::TradingConfig;
use crate::types::{Opportunity, RiskLevel};
use tracing::{debug, info};

/// Live account state an execution decision depends on.
#[derive(Debug, Clone, Default)]
pub struct RiskInputs {
    pub algo_balance: f64,
    pub active_trades: u32,
    /// Halt reason from the safety monitor.
    pub halted: Option<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Decision {
    Execute { size: f64 },
    Skip(String),
}

/// Decide whether to execute an opportunity and at what size.
pub fn evaluate(opportunity: &Opportunity, inputs: &RiskInputs, cfg: &TradingConfig) -> Decision {
    if let Some(reason) = &inputs.halted {
        return Decision::Skip(format!("trading halted: {}", reason));
    }
    if opportunity.score < cfg.min_score {
        debug!("Score {:.1} below {:.1}", opportunity.score, cfg.min_score);
        return Decision::Skip(format!("score {:.1} below {:.1}", opportunity.score, cfg.min_score));
    }
    if opportunity.risk_level == RiskLevel::High {
        return Decision::Skip("risk level too high".into());
    }
    if inputs.algo_balance < cfg.min_algo_balance {
        return Decision::Skip(format!(
            "insufficient balance: {:.6} ALGO (need {:.6})",
            inputs.algo_balance, cfg.min_algo_balance
        ));
    }
    if inputs.active_trades >= cfg.max_active_trades {
        return Decision::Skip(format!("{} active trades (max {})", inputs.active_trades, cfg.max_active_trades));
    }

    let size = position_size(opportunity.score, inputs.algo_balance, cfg);
    if size <= 0.0 {
        return Decision::Skip("position size is zero".into());
    }
    info!("Approved {} at {} (score {:.1})", opportunity.description, size, opportunity.score);
    Decision::Execute { size }
}

/// Position size from the ALGO balance, scaled by score and clamped.
pub fn position_size(score: f64, balance: f64, cfg: &TradingConfig) -> f64 {
    if balance < cfg.min_position {
        return 0.0;
    }
    let base = (balance * cfg.position_fraction).min(cfg.max_base_position);
    let multiplier = if score >= 90.0 {
        1.0
    } else if score >= 80.0 {
        0.8
    } else if score >= 70.0 {
        0.6
    } else {
        0.4
    };

    let size = (base * multiplier).clamp(cfg.min_position, cfg.max_position);
    (size * 1000.0).round() / 1000.0
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocols::tinyman;

    fn opp(score: f64, risk: RiskLevel) -> Opportunity {
        let mut o = tinyman::opportunity(&tinyman::known_pools()[0]);
        o.score = score;
        o.risk_level = risk;
        o
    }

    fn inputs(balance: f64, active: u32) -> RiskInputs {
        RiskInputs {
            algo_balance: balance,
            active_trades: active,
            halted: None,
        }
    }

    #[test]
    fn position_sizes() {
        let cfg = TradingConfig::default();
        assert_eq!(position_size(95.0, 50.0, &cfg), 1.0);
        assert_eq!(position_size(85.0, 5.0, &cfg), 0.4);
        assert_eq!(position_size(72.0, 5.0, &cfg), 0.3);
        assert_eq!(position_size(60.0, 5.0, &cfg), 0.2);
        // Clamped up to the minimum.
        assert_eq!(position_size(95.0, 0.5, &cfg), 0.1);
        assert_eq!(position_size(95.0, 0.05, &cfg), 0.0);
    }

    #[test]
    fn gating_rules() {
        let cfg = TradingConfig::default();
        assert!(matches!(evaluate(&opp(69.9, RiskLevel::Low), &inputs(5.0, 0), &cfg), Decision::Skip(_)));
        assert!(matches!(evaluate(&opp(90.0, RiskLevel::High), &inputs(5.0, 0), &cfg), Decision::Skip(_)));
        assert!(matches!(evaluate(&opp(90.0, RiskLevel::Low), &inputs(0.09, 0), &cfg), Decision::Skip(_)));
        assert!(matches!(evaluate(&opp(90.0, RiskLevel::Low), &inputs(5.0, 5), &cfg), Decision::Skip(_)));
        assert_eq!(
            evaluate(&opp(90.0, RiskLevel::Medium), &inputs(5.0, 4), &cfg),
            Decision::Execute { size: 0.5 }
        );
    }

    #[test]
    fn halt_blocks_everything() {
        let cfg = TradingConfig::default();
        let mut halted = inputs(100.0, 0);
        halted.halted = Some("below floor".into());
        match evaluate(&opp(95.0, RiskLevel::Low), &halted, &cfg) {
            Decision::Skip(reason) => assert!(reason.contains("halted")),
            other => panic!("unexpected {:?}", other),
        }
    }
}
