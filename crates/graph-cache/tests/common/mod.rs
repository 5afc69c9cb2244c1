pub mod listeners;
pub mod selections;
