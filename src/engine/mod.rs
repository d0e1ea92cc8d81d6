pub mod assignment;
pub mod locator;
pub mod matching;
pub mod orders;
pub mod sweeper;
