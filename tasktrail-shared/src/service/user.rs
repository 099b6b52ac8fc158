//! User accounts and avatars
//!
//! Avatar bytes live on local disk under [`AvatarConfig::dir`]; the database
//! keeps one [`Avatar`] row per user pointing at the file. Uploads and
//! downloads are streamed and both honor a caller-supplied
//! [`CancellationToken`]. An upload that is cancelled or too large leaves no
//! file behind.

use bytes::Bytes;
use futures::stream::{self, BoxStream, Stream, StreamExt};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio_util::sync::CancellationToken;
use tracing::instrument;
use validator::Validate;

use crate::auth::password::{hash_password, validate_password_strength};
use crate::error::{ServiceError, ServiceResult};
use crate::models::avatar::{Avatar, SaveAvatar};
use crate::models::user::{CreateUser, UpdateUser, User};
use crate::repository::{AvatarRepository, UserRepository};

/// Read size for streamed downloads
const CHUNK_SIZE: usize = 64 * 1024;

#[derive(Debug, Clone)]
pub struct AvatarConfig {
    /// Directory holding avatar files (default `var/avatars`)
    pub dir: PathBuf,

    /// Largest accepted upload in bytes (default 5 MiB)
    pub max_bytes: u64,
}

impl Default for AvatarConfig {
    fn default() -> Self {
        Self {
            dir: PathBuf::from("var/avatars"),
            max_bytes: 5 * 1024 * 1024,
        }
    }
}

#[derive(Debug, Clone, Deserialize, Validate)]
pub struct CreateUserRequest {
    #[validate(length(min = 1, max = 100))]
    pub name: String,

    #[validate(email)]
    pub email: Option<String>,

    pub password: String,
}

/// Streamed avatar body with its metadata
pub struct AvatarDownload {
    pub content_type: String,
    pub size: u64,
    pub body: BoxStream<'static, ServiceResult<Bytes>>,
}

#[derive(Clone)]
pub struct UserService {
    users: Arc<dyn UserRepository>,
    avatars: Arc<dyn AvatarRepository>,
    config: AvatarConfig,
}

impl UserService {
    pub fn new(
        users: Arc<dyn UserRepository>,
        avatars: Arc<dyn AvatarRepository>,
        config: AvatarConfig,
    ) -> Self {
        Self {
            users,
            avatars,
            config,
        }
    }

    #[instrument(skip(self, request), fields(name = %request.name))]
    pub async fn create_user(&self, request: CreateUserRequest) -> ServiceResult<User> {
        request
            .validate()
            .map_err(|e| ServiceError::InvalidInput(e.to_string()))?;
        validate_password_strength(&request.password).map_err(ServiceError::InvalidInput)?;

        let user = self
            .users
            .create_user(CreateUser {
                name: request.name,
                email: request.email,
                password_hash: hash_password(&request.password)?,
            })
            .await?;

        tracing::info!(user_id = user.id, "User created");
        Ok(user)
    }

    /// Creates the user, then stores `image` as their avatar
    ///
    /// A failed avatar upload is logged and leaves the user in place; the
    /// returned avatar is `None` in that case.
    #[instrument(skip(self, request, image, cancel), fields(name = %request.name))]
    pub async fn create_user_with_avatar(
        &self,
        request: CreateUserRequest,
        content_type: &str,
        image: Bytes,
        cancel: CancellationToken,
    ) -> ServiceResult<(User, Option<Avatar>)> {
        let user = self.create_user(request).await?;

        let body = stream::iter([Ok::<_, std::convert::Infallible>(image)]);
        let avatar = match self.upload_avatar(user.id, content_type, body, cancel).await {
            Ok(avatar) => Some(avatar),
            Err(e) => {
                tracing::warn!(user_id = user.id, error = %e, "Avatar upload failed, keeping user");
                None
            }
        };

        Ok((user, avatar))
    }

    pub async fn get_user(&self, user_id: i64) -> ServiceResult<User> {
        self.users
            .get_user(user_id)
            .await?
            .ok_or(ServiceError::UserNotFound)
    }

    pub async fn list_users(&self) -> ServiceResult<Vec<User>> {
        Ok(self.users.list_users().await?)
    }

    /// Updates name, email or active flag
    #[instrument(skip(self, update))]
    pub async fn update_user(&self, user_id: i64, update: UpdateUser) -> ServiceResult<User> {
        if update.is_empty() {
            return Err(ServiceError::NoFieldsToUpdate);
        }

        self.users
            .update_user(user_id, &update)
            .await?
            .ok_or(ServiceError::UserNotFound)
    }

    /// Removes the user together with their avatar file and row
    #[instrument(skip(self))]
    pub async fn delete_user(&self, user_id: i64) -> ServiceResult<()> {
        self.get_user(user_id).await?;

        if let Some(avatar) = self.avatars.get_avatar(user_id).await? {
            remove_file_quietly(Path::new(&avatar.file_path)).await;
            self.avatars.delete_avatar(user_id).await?;
        }

        if !self.users.delete_user(user_id).await? {
            return Err(ServiceError::UserNotFound);
        }

        tracing::info!(user_id, "User deleted");
        Ok(())
    }

    /// Streams `body` to disk and makes it the user's avatar
    ///
    /// The previous avatar file, if any, is removed once the new one is fully
    /// written. If recording the new avatar fails the new file is removed.
    #[instrument(skip(self, body, cancel))]
    pub async fn upload_avatar<S, E>(
        &self,
        user_id: i64,
        content_type: &str,
        body: S,
        cancel: CancellationToken,
    ) -> ServiceResult<Avatar>
    where
        S: Stream<Item = Result<Bytes, E>> + Unpin + Send,
        E: std::fmt::Display,
    {
        if !content_type.starts_with("image/") {
            return Err(ServiceError::InvalidInput(format!(
                "unsupported content type: {content_type}"
            )));
        }
        self.get_user(user_id).await?;

        tokio::fs::create_dir_all(&self.config.dir).await?;
        let path = self
            .config
            .dir
            .join(format!("avatar_{}_{}", user_id, uuid::Uuid::new_v4()));

        let size = match self.write_body(&path, body, &cancel).await {
            Ok(size) => size,
            Err(e) => {
                remove_file_quietly(&path).await;
                return Err(e);
            }
        };

        if let Some(old) = self.avatars.get_avatar(user_id).await? {
            remove_file_quietly(Path::new(&old.file_path)).await;
        }

        let file_path = path.to_string_lossy().into_owned();
        let avatar = match self
            .avatars
            .save_avatar(SaveAvatar {
                user_id,
                file_path: file_path.clone(),
                file_size: size as i64,
                content_type: content_type.to_string(),
            })
            .await
        {
            Ok(avatar) => avatar,
            Err(e) => {
                remove_file_quietly(&path).await;
                return Err(e.into());
            }
        };

        let update = UpdateUser {
            avatar_url: Some(Some(file_path)),
            ..Default::default()
        };
        if let Err(e) = self.users.update_user(user_id, &update).await {
            remove_file_quietly(&path).await;
            let _ = self.avatars.delete_avatar(user_id).await;
            return Err(e.into());
        }

        tracing::info!(user_id, size, "Avatar uploaded");
        Ok(avatar)
    }

    async fn write_body<S, E>(
        &self,
        path: &Path,
        mut body: S,
        cancel: &CancellationToken,
    ) -> ServiceResult<u64>
    where
        S: Stream<Item = Result<Bytes, E>> + Unpin + Send,
        E: std::fmt::Display,
    {
        let mut file = tokio::fs::File::create(path).await?;
        let mut written: u64 = 0;

        loop {
            let chunk = tokio::select! {
                biased;
                _ = cancel.cancelled() => return Err(ServiceError::Cancelled),
                next = body.next() => next,
            };

            let Some(chunk) = chunk else { break };
            let chunk = chunk.map_err(|e| ServiceError::InvalidInput(format!("upload failed: {e}")))?;

            written += chunk.len() as u64;
            if written > self.config.max_bytes {
                return Err(ServiceError::InvalidInput(format!(
                    "avatar exceeds {} bytes",
                    self.config.max_bytes
                )));
            }
            file.write_all(&chunk).await?;
        }

        file.flush().await?;
        Ok(written)
    }

    /// Whole avatar file and its content type
    pub async fn download_avatar(&self, user_id: i64) -> ServiceResult<(Vec<u8>, String)> {
        let avatar = self.find_avatar(user_id).await?;
        let data = tokio::fs::read(&avatar.file_path).await?;
        Ok((data, avatar.content_type))
    }

    /// Avatar as a chunk stream
    ///
    /// The stream yields `Err(Cancelled)` and ends once `cancel` fires.
    /// Dropping it closes the file.
    pub async fn download_avatar_stream(
        &self,
        user_id: i64,
        cancel: CancellationToken,
    ) -> ServiceResult<AvatarDownload> {
        let avatar = self.find_avatar(user_id).await?;
        let file = tokio::fs::File::open(&avatar.file_path).await?;
        let size = file.metadata().await?.len();

        let body = stream::try_unfold((file, cancel), |(mut file, cancel)| async move {
            let mut buf = vec![0u8; CHUNK_SIZE];
            let read = tokio::select! {
                biased;
                _ = cancel.cancelled() => return Err(ServiceError::Cancelled),
                read = file.read(&mut buf) => read?,
            };
            if read == 0 {
                return Ok(None);
            }
            buf.truncate(read);
            Ok(Some((Bytes::from(buf), (file, cancel))))
        })
        .boxed();

        Ok(AvatarDownload {
            content_type: avatar.content_type,
            size,
            body,
        })
    }

    pub async fn has_avatar(&self, user_id: i64) -> ServiceResult<bool> {
        Ok(self.avatars.get_avatar(user_id).await?.is_some())
    }

    #[instrument(skip(self))]
    pub async fn delete_avatar(&self, user_id: i64) -> ServiceResult<()> {
        let avatar = self.find_avatar(user_id).await?;

        remove_file_quietly(Path::new(&avatar.file_path)).await;
        self.avatars.delete_avatar(user_id).await?;
        self.users
            .update_user(
                user_id,
                &UpdateUser {
                    avatar_url: Some(None),
                    ..Default::default()
                },
            )
            .await?;

        Ok(())
    }

    async fn find_avatar(&self, user_id: i64) -> ServiceResult<Avatar> {
        self.get_user(user_id).await?;
        self.avatars
            .get_avatar(user_id)
            .await?
            .ok_or(ServiceError::AvatarNotFound)
    }
}

async fn remove_file_quietly(path: &Path) {
    if let Err(e) = tokio::fs::remove_file(path).await {
        if e.kind() != std::io::ErrorKind::NotFound {
            tracing::warn!(path = %path.display(), error = %e, "Failed to remove avatar file");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::repository::InMemoryStore;

    struct Fixture {
        service: UserService,
        dir: PathBuf,
    }

    impl Fixture {
        fn new(max_bytes: u64) -> Self {
            let store = InMemoryStore::new();
            let dir = std::env::temp_dir().join(format!("tasktrail-avatars-{}", uuid::Uuid::new_v4()));
            let service = UserService::new(
                Arc::new(store.clone()),
                Arc::new(store),
                AvatarConfig {
                    dir: dir.clone(),
                    max_bytes,
                },
            );
            Self { service, dir }
        }

        async fn user(&self) -> User {
            self.service
                .create_user(CreateUserRequest {
                    name: "Ada".to_string(),
                    email: Some("ada@example.com".to_string()),
                    password: "analytical1".to_string(),
                })
                .await
                .unwrap()
        }

        fn files(&self) -> usize {
            std::fs::read_dir(&self.dir).map(|d| d.count()).unwrap_or(0)
        }
    }

    impl Drop for Fixture {
        fn drop(&mut self) {
            let _ = std::fs::remove_dir_all(&self.dir);
        }
    }

    fn body(chunks: &[&'static [u8]]) -> impl Stream<Item = Result<Bytes, std::io::Error>> + Unpin {
        stream::iter(
            chunks
                .iter()
                .map(|c| Ok(Bytes::from_static(c)))
                .collect::<Vec<_>>(),
        )
    }

    #[tokio::test]
    async fn test_create_user_hashes_password() {
        let fx = Fixture::new(1024);
        let user = fx.user().await;

        assert_ne!(user.password_hash, "analytical1");
        assert!(user.password_hash.starts_with("$argon2id$"));
        assert_eq!(fx.service.get_user(user.id).await.unwrap().id, user.id);
    }

    #[tokio::test]
    async fn test_create_user_validates_input() {
        let fx = Fixture::new(1024);

        let bad_email = fx
            .service
            .create_user(CreateUserRequest {
                name: "x".to_string(),
                email: Some("not-an-email".to_string()),
                password: "password1".to_string(),
            })
            .await;
        assert!(matches!(bad_email, Err(ServiceError::InvalidInput(_))));

        let weak = fx
            .service
            .create_user(CreateUserRequest {
                name: "x".to_string(),
                email: None,
                password: "short".to_string(),
            })
            .await;
        assert!(matches!(weak, Err(ServiceError::InvalidInput(_))));
    }

    #[tokio::test]
    async fn test_empty_update_is_rejected() {
        let fx = Fixture::new(1024);
        let user = fx.user().await;

        assert!(matches!(
            fx.service.update_user(user.id, UpdateUser::default()).await,
            Err(ServiceError::NoFieldsToUpdate)
        ));

        let renamed = fx
            .service
            .update_user(
                user.id,
                UpdateUser {
                    name: Some("Ada L.".to_string()),
                    ..Default::default()
                },
            )
            .await
            .unwrap();
        assert_eq!(renamed.name, "Ada L.");
    }

    #[tokio::test]
    async fn test_upload_and_download_avatar() {
        let fx = Fixture::new(1024);
        let user = fx.user().await;

        let avatar = fx
            .service
            .upload_avatar(user.id, "image/png", body(&[b"abc", b"def"]), CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(avatar.file_size, 6);
        assert!(fx.service.has_avatar(user.id).await.unwrap());

        let (data, content_type) = fx.service.download_avatar(user.id).await.unwrap();
        assert_eq!(data, b"abcdef");
        assert_eq!(content_type, "image/png");

        let refreshed = fx.service.get_user(user.id).await.unwrap();
        assert_eq!(refreshed.avatar_url.as_deref(), Some(avatar.file_path.as_str()));

        let download = fx
            .service
            .download_avatar_stream(user.id, CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(download.size, 6);
        let chunks: Vec<Bytes> = download.body.map(|c| c.unwrap()).collect().await;
        assert_eq!(chunks.concat(), b"abcdef");
    }

    #[tokio::test]
    async fn test_replacing_avatar_removes_old_file() {
        let fx = Fixture::new(1024);
        let user = fx.user().await;

        let first = fx
            .service
            .upload_avatar(user.id, "image/png", body(&[b"one"]), CancellationToken::new())
            .await
            .unwrap();
        let second = fx
            .service
            .upload_avatar(user.id, "image/jpeg", body(&[b"two"]), CancellationToken::new())
            .await
            .unwrap();

        assert!(!Path::new(&first.file_path).exists());
        assert!(Path::new(&second.file_path).exists());
        assert_eq!(fx.files(), 1);
    }

    #[tokio::test]
    async fn test_oversize_upload_leaves_no_file() {
        let fx = Fixture::new(4);
        let user = fx.user().await;

        let err = fx
            .service
            .upload_avatar(user.id, "image/png", body(&[b"abc", b"def"]), CancellationToken::new())
            .await
            .unwrap_err();

        assert!(matches!(err, ServiceError::InvalidInput(_)));
        assert_eq!(fx.files(), 0);
        assert!(!fx.service.has_avatar(user.id).await.unwrap());
    }

    #[tokio::test]
    async fn test_cancelled_upload_leaves_no_file() {
        let fx = Fixture::new(1024);
        let user = fx.user().await;
        let cancel = CancellationToken::new();
        cancel.cancel();

        let stalled = body(&[b"abc"]).chain(stream::pending());
        let err = fx
            .service
            .upload_avatar(user.id, "image/png", stalled, cancel)
            .await
            .unwrap_err();

        assert!(matches!(err, ServiceError::Cancelled));
        assert_eq!(fx.files(), 0);
    }

    #[tokio::test]
    async fn test_non_image_upload_rejected() {
        let fx = Fixture::new(1024);
        let user = fx.user().await;

        let err = fx
            .service
            .upload_avatar(user.id, "text/plain", body(&[b"hi"]), CancellationToken::new())
            .await
            .unwrap_err();
        assert!(matches!(err, ServiceError::InvalidInput(_)));
    }

    #[tokio::test]
    async fn test_cancelled_download_stream_errors() {
        let fx = Fixture::new(1024);
        let user = fx.user().await;
        fx.service
            .upload_avatar(user.id, "image/png", body(&[b"abc"]), CancellationToken::new())
            .await
            .unwrap();

        let cancel = CancellationToken::new();
        let mut download = fx
            .service
            .download_avatar_stream(user.id, cancel.clone())
            .await
            .unwrap();
        cancel.cancel();

        assert!(matches!(
            download.body.next().await,
            Some(Err(ServiceError::Cancelled))
        ));
        assert!(download.body.next().await.is_none());
    }

    #[tokio::test]
    async fn test_delete_user_removes_avatar_file() {
        let fx = Fixture::new(1024);
        let user = fx.user().await;
        let avatar = fx
            .service
            .upload_avatar(user.id, "image/png", body(&[b"abc"]), CancellationToken::new())
            .await
            .unwrap();

        fx.service.delete_user(user.id).await.unwrap();

        assert!(!Path::new(&avatar.file_path).exists());
        assert!(matches!(
            fx.service.get_user(user.id).await,
            Err(ServiceError::UserNotFound)
        ));
    }

    #[tokio::test]
    async fn test_missing_avatar() {
        let fx = Fixture::new(1024);
        let user = fx.user().await;

        assert!(matches!(
            fx.service.download_avatar(user.id).await,
            Err(ServiceError::AvatarNotFound)
        ));
        assert!(matches!(
            fx.service.delete_avatar(user.id).await,
            Err(ServiceError::AvatarNotFound)
        ));
    }

    #[tokio::test]
    async fn test_create_user_with_avatar() {
        let fx = Fixture::new(1024);
        let request = CreateUserRequest {
            name: "Auto User 1".to_string(),
            email: Some("auto_user_1@example.com".to_string()),
            password: "generated7".to_string(),
        };

        let (user, avatar) = fx
            .service
            .create_user_with_avatar(request, "image/jpeg", Bytes::from_static(b"jpeg"), CancellationToken::new())
            .await
            .unwrap();

        let avatar = avatar.unwrap();
        assert_eq!(avatar.user_id, user.id);
        assert_eq!(avatar.content_type, "image/jpeg");
        assert_eq!(fx.files(), 1);
    }

    #[tokio::test]
    async fn test_oversized_avatar_keeps_created_user() {
        let fx = Fixture::new(2);
        let request = CreateUserRequest {
            name: "Auto User 2".to_string(),
            email: None,
            password: "generated7".to_string(),
        };

        let (user, avatar) = fx
            .service
            .create_user_with_avatar(request, "image/jpeg", Bytes::from_static(b"too big"), CancellationToken::new())
            .await
            .unwrap();

        assert!(avatar.is_none());
        assert!(fx.service.get_user(user.id).await.is_ok());
        assert_eq!(fx.files(), 0);
    }
}
