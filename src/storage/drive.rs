//! 云盘 v3 REST 接口

use super::{RemoteFile, RemoteFolder, RemoteStore, IO_TIMEOUT_SECS, OP_TIMEOUT_SECS};
use crate::core::native::FOLDER_MIME;
use crate::error::{Result, SyncError};
use async_trait::async_trait;
use bytes::Bytes;
use chrono::{DateTime, Duration as ChronoDuration, Utc};
use futures::{future, stream, Stream, StreamExt};
use reqwest::{Client, RequestBuilder, Response, StatusCode};
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio::io::AsyncWriteExt;
use tokio::sync::RwLock;
use tokio_util::io::ReaderStream;
use tracing::{debug, info};

const FILES_URL: &str = "https://www.googleapis.com/drive/v3/files";
const UPLOAD_URL: &str = "https://www.googleapis.com/upload/drive/v3/files";
const DEFAULT_TOKEN_URI: &str = "https://oauth2.googleapis.com/token";
const LIST_FIELDS: &str = "nextPageToken,files(id,name,mimeType,modifiedTime,md5Checksum,size)";
const PAGE_SIZE: &str = "1000";
/// 我的云盘的别名
const ROOT_ALIAS: &str = "root";
/// 令牌提前刷新的秒数
const EXPIRY_MARGIN_SECS: i64 = 60;

/// 授权令牌文件（与官方 Python 客户端保存的格式一致）
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TokenFile {
    pub token: String,
    #[serde(default)]
    pub refresh_token: Option<String>,
    #[serde(default = "default_token_uri")]
    pub token_uri: String,
    #[serde(default)]
    pub client_id: Option<String>,
    #[serde(default)]
    pub client_secret: Option<String>,
    #[serde(default)]
    pub scopes: Vec<String>,
    #[serde(default)]
    pub expiry: Option<DateTime<Utc>>,
    /// 保留其它字段，写回时不丢失
    #[serde(flatten)]
    pub extra: serde_json::Map<String, serde_json::Value>,
}

fn default_token_uri() -> String {
    DEFAULT_TOKEN_URI.to_string()
}

impl TokenFile {
    pub fn needs_refresh(&self, now: DateTime<Utc>) -> bool {
        self.expiry
            .map(|expiry| expiry - ChronoDuration::seconds(EXPIRY_MARGIN_SECS) <= now)
            .unwrap_or(false)
    }
}

#[derive(Debug, Deserialize)]
struct RefreshResponse {
    access_token: String,
    #[serde(default)]
    expires_in: Option<i64>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct FileList {
    next_page_token: Option<String>,
    #[serde(default)]
    files: Vec<DriveFile>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct DriveFile {
    id: String,
    name: String,
    mime_type: String,
    #[serde(default)]
    modified_time: Option<DateTime<Utc>>,
    #[serde(default)]
    md5_checksum: Option<String>,
    /// 接口以字符串返回
    #[serde(default)]
    size: Option<String>,
}

impl From<DriveFile> for RemoteFile {
    fn from(f: DriveFile) -> Self {
        RemoteFile {
            id: f.id,
            name: f.name,
            mime_type: f.mime_type,
            modified_time: f.modified_time.unwrap_or_default(),
            checksum: f.md5_checksum,
            size: f.size.and_then(|s| s.parse().ok()).unwrap_or(0),
        }
    }
}

#[derive(Debug, Deserialize)]
struct CreatedFile {
    id: String,
}

/// 列出子条目的查询条件
fn children_query(folder_id: &str, folders: bool) -> String {
    let escaped = folder_id.replace('\\', "\\\\").replace('\'', "\\'");
    let op = if folders { "=" } else { "!=" };
    format!(
        "'{}' in parents and mimeType {} '{}' and trashed = false",
        escaped, op, FOLDER_MIME
    )
}

pub struct DriveStorage {
    client: Client,
    credentials: RwLock<TokenFile>,
    token_path: PathBuf,
    name: String,
}

impl DriveStorage {
    /// 从缓存的令牌文件创建，不做交互式授权
    pub async fn from_token_file(token_path: &Path) -> Result<Self> {
        let content = tokio::fs::read_to_string(token_path).await.map_err(|e| {
            SyncError::Configuration(format!(
                "无法读取令牌文件 {:?}: {}，请先完成授权",
                token_path, e
            ))
        })?;
        let credentials: TokenFile = serde_json::from_str(&content).map_err(|e| {
            SyncError::Configuration(format!("令牌文件格式错误 {:?}: {}", token_path, e))
        })?;

        let client = Client::builder()
            .connect_timeout(Duration::from_secs(OP_TIMEOUT_SECS))
            .build()?;

        Ok(Self {
            client,
            credentials: RwLock::new(credentials),
            token_path: token_path.to_path_buf(),
            name: "gdrive".to_string(),
        })
    }

    /// 当前有效的访问令牌，过期时刷新并写回文件
    async fn access_token(&self) -> Result<String> {
        {
            let credentials = self.credentials.read().await;
            if !credentials.needs_refresh(Utc::now()) {
                return Ok(credentials.token.clone());
            }
        }

        let mut credentials = self.credentials.write().await;
        // 其它任务可能已经刷新过
        if !credentials.needs_refresh(Utc::now()) {
            return Ok(credentials.token.clone());
        }

        let (Some(refresh_token), Some(client_id), Some(client_secret)) = (
            credentials.refresh_token.clone(),
            credentials.client_id.clone(),
            credentials.client_secret.clone(),
        ) else {
            return Err(SyncError::Configuration(
                "访问令牌已过期且令牌文件中没有刷新凭据".to_string(),
            ));
        };

        info!("访问令牌已过期，正在刷新");
        let response = self
            .client
            .post(&credentials.token_uri)
            .timeout(Duration::from_secs(OP_TIMEOUT_SECS))
            .form(&[
                ("grant_type", "refresh_token"),
                ("refresh_token", refresh_token.as_str()),
                ("client_id", client_id.as_str()),
                ("client_secret", client_secret.as_str()),
            ])
            .send()
            .await?;
        let refreshed: RefreshResponse = check_status("refresh_token", response).await?.json().await?;

        credentials.token = refreshed.access_token;
        credentials.expiry = refreshed
            .expires_in
            .map(|secs| Utc::now() + ChronoDuration::seconds(secs));

        let serialized = serde_json::to_string_pretty(&*credentials)
            .map_err(|e| SyncError::Configuration(format!("序列化令牌失败: {}", e)))?;
        tokio::fs::write(&self.token_path, serialized)
            .await
            .map_err(|e| SyncError::io(&self.token_path, e))?;
        debug!("令牌已写回 {:?}", self.token_path);

        Ok(credentials.token.clone())
    }

    /// 附加授权头并发送，非 2xx 状态转换为错误
    async fn send(&self, operation: &str, request: RequestBuilder) -> Result<Response> {
        let token = self.access_token().await?;
        let response = request.bearer_auth(token).send().await?;
        check_status(operation, response).await
    }

    async fn list(&self, query: String) -> Result<Vec<DriveFile>> {
        let mut files = Vec::new();
        let mut page_token: Option<String> = None;

        loop {
            let mut params = vec![
                ("q", query.clone()),
                ("fields", LIST_FIELDS.to_string()),
                ("pageSize", PAGE_SIZE.to_string()),
                ("spaces", "drive".to_string()),
            ];
            if let Some(token) = page_token.take() {
                params.push(("pageToken", token));
            }

            let request = self
                .client
                .get(FILES_URL)
                .timeout(Duration::from_secs(OP_TIMEOUT_SECS))
                .query(&params);
            let page: FileList = self.send("files.list", request).await?.json().await?;
            files.extend(page.files);

            match page.next_page_token {
                Some(token) => page_token = Some(token),
                None => break,
            }
        }

        Ok(files)
    }

    /// 把响应体流式写入本地文件
    async fn save_to(&self, response: Response, dest: &Path) -> Result<()> {
        let mut file = tokio::fs::File::create(dest)
            .await
            .map_err(|e| SyncError::io(dest, e))?;
        let mut stream = response.bytes_stream();
        while let Some(chunk) = stream.next().await {
            file.write_all(&chunk?)
                .await
                .map_err(|e| SyncError::io(dest, e))?;
        }
        file.flush().await.map_err(|e| SyncError::io(dest, e))
    }
}

async fn check_status(operation: &str, response: Response) -> Result<Response> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let body = response.text().await.unwrap_or_default();
    Err(SyncError::remote(operation, Some(status.as_u16()), body))
}

fn multipart_boundary(name: &str) -> String {
    let seed = format!(
        "{}:{}",
        name,
        Utc::now().timestamp_nanos_opt().unwrap_or_default()
    );
    format!("drivesync_{:x}", md5::compute(seed))
}

/// multipart/related 的首尾两段，文件内容夹在中间
fn multipart_frame(boundary: &str, metadata: &serde_json::Value, mime_type: &str) -> (String, String) {
    let head = format!(
        "--{boundary}\r\nContent-Type: application/json; charset=UTF-8\r\n\r\n{metadata}\r\n\
         --{boundary}\r\nContent-Type: {mime_type}\r\n\r\n"
    );
    let tail = format!("\r\n--{boundary}--\r\n");
    (head, tail)
}

/// 流式的 multipart 请求体及其总长度
async fn multipart_body(
    local_path: &Path,
    boundary: &str,
    metadata: &serde_json::Value,
    mime_type: &str,
) -> Result<(u64, impl Stream<Item = std::io::Result<Bytes>> + Send + 'static)> {
    let file = tokio::fs::File::open(local_path)
        .await
        .map_err(|e| SyncError::io(local_path, e))?;
    let size = file
        .metadata()
        .await
        .map_err(|e| SyncError::io(local_path, e))?
        .len();

    let (head, tail) = multipart_frame(boundary, metadata, mime_type);
    let length = head.len() as u64 + size + tail.len() as u64;
    let body = stream::once(future::ready(Ok::<_, std::io::Error>(Bytes::from(head))))
        .chain(ReaderStream::new(file))
        .chain(stream::once(future::ready(Ok(Bytes::from(tail)))));
    Ok((length, body))
}

#[async_trait]
impl RemoteStore for DriveStorage {
    fn root_id(&self) -> &str {
        ROOT_ALIAS
    }

    async fn list_child_folders(&self, folder_id: &str) -> Result<Vec<RemoteFolder>> {
        Ok(self
            .list(children_query(folder_id, true))
            .await?
            .into_iter()
            .map(|f| RemoteFolder { id: f.id, name: f.name })
            .collect())
    }

    async fn list_files(&self, folder_id: &str) -> Result<Vec<RemoteFile>> {
        Ok(self
            .list(children_query(folder_id, false))
            .await?
            .into_iter()
            .map(RemoteFile::from)
            .collect())
    }

    async fn create_folder(&self, name: &str, parent_id: &str) -> Result<String> {
        let request = self
            .client
            .post(FILES_URL)
            .timeout(Duration::from_secs(OP_TIMEOUT_SECS))
            .query(&[("fields", "id")])
            .json(&json!({
                "name": name,
                "mimeType": FOLDER_MIME,
                "parents": [parent_id],
            }));
        let created: CreatedFile = self.send("files.create", request).await?.json().await?;
        Ok(created.id)
    }

    async fn delete_entry(&self, id: &str) -> Result<()> {
        let request = self
            .client
            .delete(format!("{}/{}", FILES_URL, id))
            .timeout(Duration::from_secs(OP_TIMEOUT_SECS));
        match self.send("files.delete", request).await {
            Ok(_) => Ok(()),
            Err(SyncError::RemoteApi {
                status: Some(code), ..
            }) if code == StatusCode::NOT_FOUND.as_u16() => Ok(()),
            Err(e) => Err(e),
        }
    }

    async fn upload_file(
        &self,
        local_path: &Path,
        name: &str,
        parent_id: &str,
        mime_type: &str,
    ) -> Result<String> {
        // 元数据和内容在同一个请求里，失败时远程不会留下空文件
        let boundary = multipart_boundary(name);
        let metadata = json!({
            "name": name,
            "mimeType": mime_type,
            "parents": [parent_id],
        });
        let (length, body) = multipart_body(local_path, &boundary, &metadata, mime_type).await?;

        let request = self
            .client
            .post(UPLOAD_URL)
            .timeout(Duration::from_secs(IO_TIMEOUT_SECS))
            .query(&[("uploadType", "multipart"), ("fields", "id")])
            .header(
                reqwest::header::CONTENT_TYPE,
                format!("multipart/related; boundary={}", boundary),
            )
            .header(reqwest::header::CONTENT_LENGTH, length)
            .body(reqwest::Body::wrap_stream(body));
        let created: CreatedFile = self
            .send("files.create(multipart)", request)
            .await?
            .json()
            .await?;
        debug!("已上传 {} ({})", name, created.id);
        Ok(created.id)
    }

    async fn update_file_content(&self, id: &str, local_path: &Path, mime_type: &str) -> Result<()> {
        let file = tokio::fs::File::open(local_path)
            .await
            .map_err(|e| SyncError::io(local_path, e))?;
        let size = file
            .metadata()
            .await
            .map_err(|e| SyncError::io(local_path, e))?
            .len();

        let request = self
            .client
            .patch(format!("{}/{}", UPLOAD_URL, id))
            .timeout(Duration::from_secs(IO_TIMEOUT_SECS))
            .query(&[("uploadType", "media")])
            .header(reqwest::header::CONTENT_TYPE, mime_type)
            .header(reqwest::header::CONTENT_LENGTH, size)
            .body(reqwest::Body::wrap_stream(ReaderStream::new(file)));
        self.send("files.update(media)", request).await?;
        Ok(())
    }

    async fn rename_file(&self, id: &str, new_name: &str) -> Result<()> {
        let request = self
            .client
            .patch(format!("{}/{}", FILES_URL, id))
            .timeout(Duration::from_secs(OP_TIMEOUT_SECS))
            .json(&json!({ "name": new_name }));
        self.send("files.update", request).await?;
        Ok(())
    }

    async fn export_and_download(&self, id: &str, export_mime: &str, dest: &Path) -> Result<()> {
        let request = self
            .client
            .get(format!("{}/{}/export", FILES_URL, id))
            .timeout(Duration::from_secs(IO_TIMEOUT_SECS))
            .query(&[("mimeType", export_mime)]);
        let response = self.send("files.export", request).await?;
        self.save_to(response, dest).await
    }

    async fn download_file(&self, id: &str, dest: &Path) -> Result<()> {
        let request = self
            .client
            .get(format!("{}/{}", FILES_URL, id))
            .timeout(Duration::from_secs(IO_TIMEOUT_SECS))
            .query(&[("alt", "media")]);
        let response = self.send("files.get(media)", request).await?;
        self.save_to(response, dest).await
    }

    fn name(&self) -> &str {
        &self.name
    }
}
