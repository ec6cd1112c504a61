pub mod health;
pub mod streaks;
