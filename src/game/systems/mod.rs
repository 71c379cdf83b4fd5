pub mod clumping;
pub mod forces;
