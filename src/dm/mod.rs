pub mod conversations;
pub mod extract;
pub mod messages;
