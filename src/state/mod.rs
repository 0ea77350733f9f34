pub mod ccu_board;

pub use ccu_board::{CcuBoard, LiveReading};
