//! Protocol drivers

pub mod flarm;
pub mod lxnav;
