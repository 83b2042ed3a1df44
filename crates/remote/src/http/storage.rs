//! Storage binding (`/storage/v1/object/*`).

use super::RestClient;
use crate::error::{RemoteError, RemoteResult};
use crate::storage::{content_type_for, ObjectEntry, ObjectStorage, UploadOptions};
use reqwest::Method;
use serde::Deserialize;
use serde_json::json;

/// Page size of storage listings.
const LIST_PAGE: usize = 100;

#[derive(Deserialize)]
struct ListedObject {
    name: String,
    /// Folders have no id.
    id: Option<String>,
    #[serde(default)]
    metadata: Option<ListedMetadata>,
}

#[derive(Deserialize)]
struct ListedMetadata {
    size: Option<u64>,
}

impl From<ListedObject> for ObjectEntry {
    fn from(object: ListedObject) -> Self {
        ObjectEntry {
            is_folder: object.id.is_none(),
            size: object.metadata.and_then(|m| m.size),
            name: object.name,
        }
    }
}

/// Object storage over the project's storage endpoint.
#[derive(Clone, Debug)]
pub struct HttpObjectStorage {
    client: RestClient,
}

impl HttpObjectStorage {
    pub fn new(client: RestClient) -> Self {
        Self { client }
    }

    fn object_path(bucket: &str, path: &str) -> String {
        format!("/storage/v1/object/{}/{}", bucket, encode_path(path))
    }
}

/// Percent-encode each segment of an object path, keeping the separators.
fn encode_path(path: &str) -> String {
    path.trim_matches('/')
        .split('/')
        .map(urlencoding::encode)
        .collect::<Vec<_>>()
        .join("/")
}

/// Storage reports duplicates as 400 with an embedded 409; normalize to 409.
fn normalize_conflict(err: RemoteError) -> RemoteError {
    match err {
        RemoteError::Http { status: 400, body }
            if body.contains("\"statusCode\":\"409\"") || body.contains("already exists") =>
        {
            RemoteError::Http { status: 409, body }
        }
        other => other,
    }
}

impl ObjectStorage for HttpObjectStorage {
    async fn list(&self, bucket: &str, prefix: &str) -> RemoteResult<Vec<ObjectEntry>> {
        let mut entries = Vec::new();
        let mut offset = 0;
        loop {
            let request = self
                .client
                .request(Method::POST, &format!("/storage/v1/object/list/{}", bucket))
                .json(&json!({
                    "prefix": prefix.trim_matches('/'),
                    "limit": LIST_PAGE,
                    "offset": offset,
                    "sortBy": { "column": "name", "order": "asc" },
                }));
            let page: Vec<ListedObject> = self.client.send(request).await?.json().await?;
            let page_len = page.len();
            entries.extend(page.into_iter().map(ObjectEntry::from));
            if page_len < LIST_PAGE {
                break;
            }
            offset += page_len;
        }
        Ok(entries)
    }

    async fn download(&self, bucket: &str, path: &str) -> RemoteResult<Vec<u8>> {
        let request = self
            .client
            .request(Method::GET, &Self::object_path(bucket, path));
        let bytes = self.client.send(request).await?.bytes().await?;
        Ok(bytes.to_vec())
    }

    async fn upload(
        &self,
        bucket: &str,
        path: &str,
        bytes: Vec<u8>,
        options: &UploadOptions,
    ) -> RemoteResult<()> {
        let content_type = options
            .content_type
            .clone()
            .unwrap_or_else(|| content_type_for(path).to_string());
        let request = self
            .client
            .request(Method::POST, &Self::object_path(bucket, path))
            .header("x-upsert", if options.overwrite { "true" } else { "false" })
            .header("content-type", content_type)
            .body(bytes);
        self.client
            .send(request)
            .await
            .map(|_| ())
            .map_err(normalize_conflict)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_encode_path_escapes_segments() {
        assert_eq!(encode_path("players/p-1/photo.jpg"), "players/p-1/photo.jpg");
        assert_eq!(
            encode_path("/players/p 1/clip#2?.mp4"),
            "players/p%201/clip%232%3F.mp4"
        );
        assert_eq!(encode_path("100%/ünïcode.png"), "100%25/%C3%BCn%C3%AFcode.png");
    }
    use crate::config::RemoteConfig;
    use crate::error::ErrorClass;
    use crate::session::SessionContext;
    use mockito::Matcher;

    fn storage(server: &mockito::Server) -> HttpObjectStorage {
        let config = RemoteConfig::new(server.url(), "key").with_service_role_key("key");
        HttpObjectStorage::new(RestClient::new(config, SessionContext::new()).unwrap())
    }

    #[tokio::test]
    async fn test_list_marks_folders() {
        let mut server = mockito::Server::new_async().await;
        let _mock = server
            .mock("POST", "/storage/v1/object/list/player-media")
            .match_body(Matcher::PartialJson(serde_json::json!({ "prefix": "players" })))
            .with_status(200)
            .with_body(
                r#"[{"name":"7","id":null,"metadata":null},
                    {"name":"a.jpg","id":"f1","metadata":{"size":12}}]"#,
            )
            .create_async()
            .await;

        let entries = storage(&server).list("player-media", "players/").await.unwrap();
        assert_eq!(
            entries,
            vec![ObjectEntry::folder("7"), ObjectEntry::file("a.jpg", 12)]
        );
    }

    #[tokio::test]
    async fn test_upload_sets_upsert_and_content_type() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("POST", "/storage/v1/object/player-media/players/7/a.jpg")
            .match_header("x-upsert", "true")
            .match_header("content-type", "image/jpeg")
            .match_body("jpeg-bytes")
            .with_status(200)
            .with_body(r#"{"Key":"player-media/players/7/a.jpg"}"#)
            .create_async()
            .await;

        storage(&server)
            .upload(
                "player-media",
                "players/7/a.jpg",
                b"jpeg-bytes".to_vec(),
                &UploadOptions::overwrite(true),
            )
            .await
            .unwrap();
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn test_duplicate_upload_is_conflict() {
        let mut server = mockito::Server::new_async().await;
        let _mock = server
            .mock("POST", "/storage/v1/object/player-media/a.jpg")
            .with_status(400)
            .with_body(r#"{"statusCode":"409","error":"Duplicate","message":"The resource already exists"}"#)
            .create_async()
            .await;

        let err = storage(&server)
            .upload("player-media", "a.jpg", vec![1], &UploadOptions::default())
            .await
            .unwrap_err();
        assert_eq!(err.class(), ErrorClass::Conflict);
    }

    #[tokio::test]
    async fn test_download_returns_bytes() {
        let mut server = mockito::Server::new_async().await;
        let _mock = server
            .mock("GET", "/storage/v1/object/player-media/players/7/a.jpg")
            .with_status(200)
            .with_body(vec![0xFF, 0xD8, 0xFF])
            .create_async()
            .await;

        let bytes = storage(&server)
            .download("player-media", "players/7/a.jpg")
            .await
            .unwrap();
        assert_eq!(bytes, vec![0xFF, 0xD8, 0xFF]);
    }
}
