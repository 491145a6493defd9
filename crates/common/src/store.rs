//! Persistence contract for instances and their child rows
//!
//! Every lookup of an instance is scoped by the owning user id; a row owned by
//! someone else is indistinguishable from an absent row.

use crate::types::*;
use crate::Result;
use async_trait::async_trait;

#[async_trait]
pub trait InstanceStore: Send + Sync {
    /// Instances owned by `user_id`, newest first.
    async fn list_instances(&self, user_id: &str) -> Result<Vec<Instance>>;

    async fn get_instance(&self, id: &str, user_id: &str) -> Result<Option<Instance>>;

    async fn find_instance_by_name(&self, user_id: &str, name: &str) -> Result<Option<Instance>>;

    /// Fails with [`crate::Error::AlreadyExists`] when (name, user_id) is taken.
    async fn insert_instance(&self, new: NewInstance) -> Result<Instance>;

    async fn update_instance(&self, id: &str, patch: InstancePatch) -> Result<()>;

    /// Returns whether a row was removed. Services and users cascade.
    async fn delete_instance(&self, id: &str, user_id: &str) -> Result<bool>;

    async fn list_services(&self, instance_id: &str) -> Result<Vec<Service>>;

    async fn insert_services(&self, services: Vec<NewService>) -> Result<Vec<Service>>;

    async fn list_users(&self, instance_id: &str) -> Result<Vec<VmUser>>;

    async fn insert_users(&self, users: Vec<NewVmUser>) -> Result<Vec<VmUser>>;
}
