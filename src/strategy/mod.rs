// Trading strategy module
pub mod ladder;

pub use ladder::{
    parse_rungs, CycleState, LadderConfig, LadderEngine, Rung, RungSkip, LAST_BUY_RSI_SENTINEL,
};
