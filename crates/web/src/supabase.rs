//! Supabase (PostgREST) backed instance store
//!
//! Requests are sent with the project's anon key and the caller's own access
//! token, so the database's row-level security policies apply in addition to
//! the explicit `user_id` filters below.

use async_trait::async_trait;
use reqwest::{Method, RequestBuilder, Response};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use tracing::debug;
use vboxdash_common::{
    Error, Instance, InstancePatch, InstanceStore, NewInstance, NewService, NewVmUser, Result, Service,
    VmUser,
};

/// Postgres error code for unique violations.
const UNIQUE_VIOLATION: &str = "23505";

/// Connection settings shared by all per-caller stores
#[derive(Debug, Clone)]
pub struct SupabaseSettings {
    pub client: reqwest::Client,
    pub base_url: String,
    pub anon_key: String,
}

impl SupabaseSettings {
    pub fn new(client: reqwest::Client, base_url: &str, anon_key: &str) -> Self {
        Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            anon_key: anon_key.to_string(),
        }
    }
}

/// PostgREST error body
#[derive(Debug, Default, Deserialize)]
struct PostgrestError {
    code: Option<String>,
    message: Option<String>,
    details: Option<String>,
}

/// Store acting with one caller's credentials
pub struct SupabaseStore {
    settings: SupabaseSettings,
    access_token: String,
}

impl SupabaseStore {
    pub fn new(settings: SupabaseSettings, access_token: &str) -> Self {
        Self {
            settings,
            access_token: access_token.to_string(),
        }
    }

    fn request(&self, method: Method, table: &str) -> RequestBuilder {
        self.settings
            .client
            .request(method, format!("{}/rest/v1/{}", self.settings.base_url, table))
            .header("apikey", &self.settings.anon_key)
            .bearer_auth(&self.access_token)
    }

    async fn send(&self, kind: &str, builder: RequestBuilder) -> Result<Response> {
        let response = builder.send().await.map_err(remote)?;
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }

        let body: PostgrestError = response.json().await.unwrap_or_default();
        debug!("PostgREST {} error {}: {:?}", kind, status, body);
        if body.code.as_deref() == Some(UNIQUE_VIOLATION) {
            return Err(Error::AlreadyExists {
                kind: kind.to_string(),
                id: body.details.unwrap_or_default(),
            });
        }
        Err(Error::Remote(format!(
            "{} request failed with {}: {}",
            kind,
            status,
            body.message.unwrap_or_else(|| "no message".to_string())
        )))
    }

    async fn select<T: DeserializeOwned>(&self, table: &str, filters: &[(&str, String)], order: Option<&str>) -> Result<Vec<T>> {
        let mut query: Vec<(&str, String)> = vec![("select", "*".to_string())];
        query.extend(filters.iter().cloned());
        if let Some(order) = order {
            query.push(("order", order.to_string()));
        }
        let response = self.send(table, self.request(Method::GET, table).query(&query)).await?;
        decode(response).await
    }

    async fn insert<B: Serialize + ?Sized, T: DeserializeOwned>(&self, table: &str, body: &B) -> Result<Vec<T>> {
        let builder = self
            .request(Method::POST, table)
            .header("Prefer", "return=representation")
            .json(body);
        let response = self.send(table, builder).await?;
        decode(response).await
    }
}

/// Decode a success body; shape mismatches surface as [`Error::Serialization`].
async fn decode<T: DeserializeOwned>(response: Response) -> Result<T> {
    let body = response.text().await.map_err(remote)?;
    Ok(serde_json::from_str(&body)?)
}

fn remote(e: reqwest::Error) -> Error {
    Error::Remote(e.to_string())
}

fn eq(value: &str) -> String {
    format!("eq.{}", value)
}

#[async_trait]
impl InstanceStore for SupabaseStore {
    async fn list_instances(&self, user_id: &str) -> Result<Vec<Instance>> {
        self.select("instances", &[("user_id", eq(user_id))], Some("created_at.desc"))
            .await
    }

    async fn get_instance(&self, id: &str, user_id: &str) -> Result<Option<Instance>> {
        let rows: Vec<Instance> = self
            .select("instances", &[("id", eq(id)), ("user_id", eq(user_id))], None)
            .await?;
        Ok(rows.into_iter().next())
    }

    async fn find_instance_by_name(&self, user_id: &str, name: &str) -> Result<Option<Instance>> {
        let rows: Vec<Instance> = self
            .select("instances", &[("name", eq(name)), ("user_id", eq(user_id))], None)
            .await?;
        Ok(rows.into_iter().next())
    }

    async fn insert_instance(&self, new: NewInstance) -> Result<Instance> {
        let rows: Vec<Instance> = self.insert("instances", &new).await?;
        rows.into_iter()
            .next()
            .ok_or_else(|| Error::Remote("insert returned no instance row".to_string()))
    }

    async fn update_instance(&self, id: &str, patch: InstancePatch) -> Result<()> {
        if patch.is_empty() {
            return Ok(());
        }
        let builder = self
            .request(Method::PATCH, "instances")
            .query(&[("id", eq(id))])
            .json(&patch);
        self.send("instances", builder).await?;
        Ok(())
    }

    async fn delete_instance(&self, id: &str, user_id: &str) -> Result<bool> {
        let builder = self
            .request(Method::DELETE, "instances")
            .query(&[("id", eq(id)), ("user_id", eq(user_id))])
            .header("Prefer", "return=representation");
        let response = self.send("instances", builder).await?;
        let removed: Vec<serde_json::Value> = decode(response).await?;
        Ok(!removed.is_empty())
    }

    async fn list_services(&self, instance_id: &str) -> Result<Vec<Service>> {
        self.select("services", &[("instance_id", eq(instance_id))], None).await
    }

    async fn insert_services(&self, services: Vec<NewService>) -> Result<Vec<Service>> {
        if services.is_empty() {
            return Ok(Vec::new());
        }
        self.insert("services", &services).await
    }

    async fn list_users(&self, instance_id: &str) -> Result<Vec<VmUser>> {
        self.select("vm_users", &[("instance_id", eq(instance_id))], None).await
    }

    async fn insert_users(&self, users: Vec<NewVmUser>) -> Result<Vec<VmUser>> {
        if users.is_empty() {
            return Ok(Vec::new());
        }
        self.insert("vm_users", &users).await
    }
}
