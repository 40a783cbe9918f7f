pub mod bracket;
pub mod grid;
pub mod pullback_trailing;
pub mod scale_out;
pub mod trailing_stop;
