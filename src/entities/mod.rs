//! SeaORM entity definitions for the persisted state layout:
//! `users`, `distributed_locks` and the general-purpose `cache` table.

pub mod cache;
pub mod distributed_locks;
pub mod users;

pub mod prelude {
    pub use super::cache::Entity as Cache;
    pub use super::distributed_locks::Entity as DistributedLocks;
    pub use super::users::Entity as Users;
}
