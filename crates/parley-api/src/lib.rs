pub mod auth;
pub mod friends;
pub mod messages;
pub mod middleware;
pub mod users;
