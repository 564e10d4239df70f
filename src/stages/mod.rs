pub mod stage0_window;
pub mod stage1_match;
pub mod stage2_consensus;
pub mod stage3_agreement;

pub use stage0_window::*;
pub use stage1_match::*;
pub use stage2_consensus::*;
pub use stage3_agreement::*;
