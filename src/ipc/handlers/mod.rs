pub mod activity;
pub mod artifacts;
pub mod assignments;
pub mod attendance;
pub mod backup;
pub mod classes;
pub mod core;
pub mod invitations;
pub mod resources;
pub mod users;
