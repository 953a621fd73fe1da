use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;

use reqwest::Client;
use reqwest::header::HeaderMap;
use serde_json::Value;
use tempfile::TempDir;

use ::common::storage::filesystem::FilesystemBlobStore;
use filebox_server::config::{AppConfig, CorsConfig, DatabaseConfig, ServerConfig, StorageConfig};
use filebox_server::index::{MetadataIndex, SeaOrmIndex};
use filebox_server::service::FileService;
use filebox_server::state::AppState;

/// Blob size limit used by test servers unless overridden.
pub const TEST_MAX_BLOB_SIZE: u64 = 1024 * 1024;

pub mod routes {
    pub const FILES: &str = "/files";
    pub const AUDIT: &str = "/audit";
    pub const OPENAPI: &str = "/api-docs/openapi.json";

    pub fn file(id: &str) -> String {
        format!("/files/{id}")
    }

    pub fn download(id: &str) -> String {
        format!("/files/{id}/download")
    }
}

/// A running test server backed by in-memory SQLite and a temp volume.
pub struct TestApp {
    pub addr: SocketAddr,
    pub client: Client,
    volume: TempDir,
}

/// Parsed HTTP response for test assertions.
pub struct TestResponse {
    pub status: u16,
    /// Raw response body as text.
    pub text: String,
    /// Parsed JSON body, or `Null` if the response is not valid JSON.
    pub body: Value,
}

impl TestResponse {
    pub async fn from_response(res: reqwest::Response) -> Self {
        let status = res.status().as_u16();
        let text = res.text().await.unwrap_or_default();
        let body = serde_json::from_str(&text).unwrap_or(Value::Null);
        Self { status, text, body }
    }
}

/// Raw download response.
pub struct TestDownload {
    pub status: u16,
    pub headers: HeaderMap,
    pub bytes: Vec<u8>,
}

impl TestDownload {
    pub fn header(&self, name: &str) -> &str {
        self.headers
            .get(name)
            .unwrap_or_else(|| panic!("missing header {name}"))
            .to_str()
            .expect("non-ASCII header value")
    }
}

impl TestApp {
    pub async fn spawn() -> Self {
        Self::spawn_inner(TEST_MAX_BLOB_SIZE, None).await
    }

    pub async fn spawn_with_limit(max_blob_size: u64) -> Self {
        Self::spawn_inner(max_blob_size, None).await
    }

    /// Spawn with a custom metadata index in place of the database.
    pub async fn spawn_with_index(index: Arc<dyn MetadataIndex>) -> Self {
        Self::spawn_inner(TEST_MAX_BLOB_SIZE, Some(index)).await
    }

    async fn spawn_inner(max_blob_size: u64, index: Option<Arc<dyn MetadataIndex>>) -> Self {
        let volume = tempfile::tempdir().expect("Failed to create temp volume");

        let app_config = AppConfig {
            server: ServerConfig {
                host: "127.0.0.1".to_string(),
                port: 0,
                cors: CorsConfig::default(),
            },
            database: DatabaseConfig {
                url: "sqlite::memory:".to_string(),
                // A single connection keeps the in-memory database alive and shared.
                max_connections: 1,
            },
            storage: StorageConfig {
                volume_root: volume.path().join("files"),
                max_blob_size,
                compensate_orphans: true,
            },
        };

        let index = match index {
            Some(index) => index,
            None => {
                let db = filebox_server::database::init_db(
                    &app_config.database.url,
                    app_config.database.max_connections,
                )
                .await
                .expect("Failed to initialize test database");
                Arc::new(SeaOrmIndex::new(db))
            }
        };

        let blobs = FilesystemBlobStore::new(
            app_config.storage.volume_root.clone(),
            app_config.storage.max_blob_size,
        )
        .await
        .expect("Failed to create blob store");

        let files = FileService::new(Arc::new(blobs), index)
            .with_orphan_compensation(app_config.storage.compensate_orphans);

        let state = AppState {
            files: Arc::new(files),
            config: app_config,
        };

        let app = filebox_server::build_router(state);

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
            .await
            .expect("Failed to bind to random port");
        let addr = listener.local_addr().unwrap();

        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });

        Self {
            addr,
            client: Client::new(),
            volume,
        }
    }

    fn url(&self, path: &str) -> String {
        format!("http://{}{}", self.addr, path)
    }

    /// Root of the blob volume.
    pub fn volume_root(&self) -> PathBuf {
        self.volume.path().join("files")
    }

    /// Identifier directories currently on the volume.
    pub fn blob_dirs(&self) -> Vec<String> {
        let mut dirs: Vec<String> = std::fs::read_dir(self.volume_root())
            .expect("Failed to read volume")
            .filter_map(|entry| entry.ok())
            .filter(|entry| entry.path().is_dir())
            .map(|entry| entry.file_name().to_string_lossy().into_owned())
            .filter(|name| !name.starts_with('.'))
            .collect();
        dirs.sort();
        dirs
    }

    pub async fn get(&self, path: &str) -> TestResponse {
        let res = self
            .client
            .get(self.url(path))
            .send()
            .await
            .expect("Failed to send GET request");

        TestResponse::from_response(res).await
    }

    pub async fn delete(&self, path: &str) -> TestResponse {
        let res = self
            .client
            .delete(self.url(path))
            .send()
            .await
            .expect("Failed to send DELETE request");

        TestResponse::from_response(res).await
    }

    pub async fn post_json(&self, path: &str, body: &Value) -> TestResponse {
        let res = self
            .client
            .post(self.url(path))
            .json(body)
            .send()
            .await
            .expect("Failed to send POST request");

        TestResponse::from_response(res).await
    }

    pub async fn post_form(&self, path: &str, form: reqwest::multipart::Form) -> TestResponse {
        let res = self
            .client
            .post(self.url(path))
            .multipart(form)
            .send()
            .await
            .expect("Failed to send multipart request");

        TestResponse::from_response(res).await
    }

    /// POST a hand-built multipart body using `boundary`.
    pub async fn post_multipart_raw(
        &self,
        path: &str,
        boundary: &str,
        body: Vec<u8>,
    ) -> TestResponse {
        let res = self
            .client
            .post(self.url(path))
            .header(
                reqwest::header::CONTENT_TYPE,
                format!("multipart/form-data; boundary={boundary}"),
            )
            .body(body)
            .send()
            .await
            .expect("Failed to send multipart request");

        TestResponse::from_response(res).await
    }

    /// Upload `file_bytes` as the `file` field with the given filename.
    pub async fn upload(&self, file_name: &str, file_bytes: Vec<u8>) -> TestResponse {
        let part = reqwest::multipart::Part::bytes(file_bytes).file_name(file_name.to_string());
        let form = reqwest::multipart::Form::new().part("file", part);
        self.post_form(routes::FILES, form).await
    }

    /// Upload a file and return its id, asserting success.
    pub async fn upload_ok(&self, file_name: &str, file_bytes: &[u8]) -> String {
        let res = self.upload(file_name, file_bytes.to_vec()).await;
        assert_eq!(res.status, 200, "Upload failed: {}", res.text);
        res.body["id"]
            .as_str()
            .expect("upload response has no id")
            .to_string()
    }

    pub async fn download(&self, id: &str) -> TestDownload {
        let res = self
            .client
            .get(self.url(&routes::download(id)))
            .send()
            .await
            .expect("Failed to send download request");

        let status = res.status().as_u16();
        let headers = res.headers().clone();
        let bytes = res
            .bytes()
            .await
            .expect("Failed to read download body")
            .to_vec();

        TestDownload {
            status,
            headers,
            bytes,
        }
    }
}
