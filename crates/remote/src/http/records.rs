//! REST binding of the record store (`/rest/v1/{collection}`).

use super::RestClient;
use crate::error::{RemoteError, RemoteResult};
use crate::query::{Filter, Query};
use crate::record_store::{row_id, InsertOutcome, RecordStore, Row};
use reqwest::Method;

/// Record store over the project's REST endpoint.
#[derive(Clone, Debug)]
pub struct HttpRecordStore {
    client: RestClient,
}

impl HttpRecordStore {
    pub fn new(client: RestClient) -> Self {
        Self { client }
    }

    pub fn client(&self) -> &RestClient {
        &self.client
    }

    fn path(collection: &str) -> String {
        format!("/rest/v1/{}", collection)
    }
}

fn filter_pairs(filters: &[Filter]) -> Vec<(String, String)> {
    filters.iter().map(Filter::to_pair).collect()
}

impl RecordStore for HttpRecordStore {
    async fn select(&self, collection: &str, query: &Query) -> RemoteResult<Vec<Row>> {
        let request = self
            .client
            .request(Method::GET, &Self::path(collection))
            .query(&[("select", "*")])
            .query(&query.to_pairs());
        let rows: Vec<Row> = self.client.send(request).await?.json().await?;
        Ok(rows)
    }

    async fn insert(&self, collection: &str, record: Row) -> RemoteResult<InsertOutcome> {
        let id = row_id(&record).ok_or_else(|| {
            RemoteError::InvalidPayload(format!("{} insert without an id", collection))
        })?;
        // Duplicate ids are ignored server-side and come back as an empty array.
        let request = self
            .client
            .request(Method::POST, &Self::path(collection))
            .query(&[("on_conflict", "id")])
            .header("Prefer", "return=representation,resolution=ignore-duplicates")
            .json(&[record]);
        let mut rows: Vec<Row> = self.client.send(request).await?.json().await?;

        if rows.is_empty() {
            tracing::debug!(collection, id = %id, "Insert ignored, record already exists");
            Ok(InsertOutcome::AlreadyExists)
        } else {
            Ok(InsertOutcome::Created(rows.swap_remove(0)))
        }
    }

    async fn update(&self, collection: &str, filters: &[Filter], changes: Row) -> RemoteResult<Vec<Row>> {
        if filters.is_empty() {
            return Err(RemoteError::InvalidPayload(
                "refusing to update without a filter".to_string(),
            ));
        }
        let request = self
            .client
            .request(Method::PATCH, &Self::path(collection))
            .query(&filter_pairs(filters))
            .header("Prefer", "return=representation")
            .json(&changes);
        let rows: Vec<Row> = self.client.send(request).await?.json().await?;
        Ok(rows)
    }

    async fn delete(&self, collection: &str, filters: &[Filter]) -> RemoteResult<usize> {
        if filters.is_empty() {
            return Err(RemoteError::InvalidPayload(
                "refusing to delete without a filter".to_string(),
            ));
        }
        let request = self
            .client
            .request(Method::DELETE, &Self::path(collection))
            .query(&filter_pairs(filters))
            .header("Prefer", "return=representation");
        let rows: Vec<Row> = self.client.send(request).await?.json().await?;
        Ok(rows.len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::RemoteConfig;
    use crate::error::ErrorClass;
    use crate::query::Order;
    use crate::session::SessionContext;
    use mockito::Matcher;
    use serde_json::json;

    fn store(server: &mockito::Server) -> HttpRecordStore {
        let client = RestClient::new(RemoteConfig::new(server.url(), "anon"), SessionContext::new()).unwrap();
        HttpRecordStore::new(client)
    }

    #[tokio::test]
    async fn test_select_renders_query() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("GET", "/rest/v1/players")
            .match_query(Matcher::AllOf(vec![
                Matcher::UrlEncoded("select".into(), "*".into()),
                Matcher::UrlEncoded("club_id".into(), "eq.4".into()),
                Matcher::UrlEncoded("order".into(), "updated_at.desc".into()),
                Matcher::UrlEncoded("limit".into(), "50".into()),
            ]))
            .with_status(200)
            .with_body(r#"[{"id":"p1"},{"id":"p2"}]"#)
            .create_async()
            .await;

        let query = Query::new()
            .filter(Filter::eq("club_id", 4))
            .order(Order::desc("updated_at"))
            .limit(50);
        let rows = store(&server).select("players", &query).await.unwrap();
        assert_eq!(rows.len(), 2);
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn test_insert_created_and_duplicate() {
        let mut server = mockito::Server::new_async().await;
        let created = server
            .mock("POST", "/rest/v1/observations")
            .match_query(Matcher::UrlEncoded("on_conflict".into(), "id".into()))
            .match_header("prefer", "return=representation,resolution=ignore-duplicates")
            .match_body(Matcher::Json(json!([{ "id": "op-1", "rating": 7 }])))
            .with_status(201)
            .with_body(r#"[{"id":"op-1","rating":7}]"#)
            .create_async()
            .await;
        let duplicate = server
            .mock("POST", "/rest/v1/observations")
            .match_query(Matcher::Any)
            .match_body(Matcher::Json(json!([{ "id": "op-2" }])))
            .with_status(201)
            .with_body("[]")
            .create_async()
            .await;

        let store = store(&server);
        let outcome = store
            .insert("observations", json!({ "id": "op-1", "rating": 7 }))
            .await
            .unwrap();
        assert_eq!(outcome, InsertOutcome::Created(json!({ "id": "op-1", "rating": 7 })));

        let outcome = store.insert("observations", json!({ "id": "op-2" })).await.unwrap();
        assert_eq!(outcome, InsertOutcome::AlreadyExists);

        created.assert_async().await;
        duplicate.assert_async().await;
    }

    #[tokio::test]
    async fn test_insert_without_id_is_rejected_locally() {
        let server = mockito::Server::new_async().await;
        let err = store(&server)
            .insert("observations", json!({ "rating": 7 }))
            .await
            .unwrap_err();
        assert_eq!(err.class(), ErrorClass::Permanent);
    }

    #[tokio::test]
    async fn test_error_status_and_body_preserved() {
        let mut server = mockito::Server::new_async().await;
        let _mock = server
            .mock("PATCH", "/rest/v1/observations")
            .match_query(Matcher::UrlEncoded("id".into(), "eq.o1".into()))
            .with_status(422)
            .with_body(r#"{"message":"rating out of range"}"#)
            .create_async()
            .await;

        let err = store(&server)
            .update("observations", &[Filter::eq("id", "o1")], json!({ "rating": 12 }))
            .await
            .unwrap_err();
        assert_eq!(
            err,
            RemoteError::Http {
                status: 422,
                body: r#"{"message":"rating out of range"}"#.into()
            }
        );
        assert_eq!(err.class(), ErrorClass::Permanent);
    }

    #[tokio::test]
    async fn test_delete_counts_rows() {
        let mut server = mockito::Server::new_async().await;
        let _mock = server
            .mock("DELETE", "/rest/v1/observation_media")
            .match_query(Matcher::UrlEncoded("id".into(), "eq.m1".into()))
            .with_status(200)
            .with_body(r#"[{"id":"m1"}]"#)
            .create_async()
            .await;

        let store = store(&server);
        let deleted = store
            .delete("observation_media", &[Filter::eq("id", "m1")])
            .await
            .unwrap();
        assert_eq!(deleted, 1);
        assert!(store.delete("observation_media", &[]).await.is_err());
    }

    #[tokio::test]
    async fn test_server_errors_are_transient() {
        let mut server = mockito::Server::new_async().await;
        let _mock = server
            .mock("GET", "/rest/v1/positions")
            .match_query(Matcher::Any)
            .with_status(503)
            .create_async()
            .await;

        let err = store(&server).select("positions", &Query::new()).await.unwrap_err();
        assert!(err.is_transient());
    }
}
