//! Synthetic traffic generators
//!
//! Enabled with `SEED_ENABLED`, two loops run next to the HTTP server and
//! stop when its shutdown token fires:
//!
//! - [`TaskSeeder`] creates one task per tick for the active users in turn,
//!   cycling through every status. Every third task is then updated to
//!   `completed` and every fifth deleted, so the audit stream sees all three
//!   actions.
//! - [`UserSeeder`] creates up to `max_users` users, each with an avatar from
//!   the configured image directory and a stored refresh token, then stops.
//!
//! Each seeder owns its counters and hands them back when it stops.

use bytes::Bytes;
use std::path::Path;
use std::time::Duration;
use tasktrail_shared::error::ServiceResult;
use tasktrail_shared::models::task::{CreateTask, TaskStatus, TaskUpdate};
use tasktrail_shared::models::user::User;
use tasktrail_shared::service::{AuthService, CreateUserRequest, TaskService, UserService};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::app::AppState;
use crate::config::SeedSettings;

/// Status given to the n-th generated task is `STATUS_CYCLE[n % 4]`
const STATUS_CYCLE: [TaskStatus; 4] = [
    TaskStatus::Pending,
    TaskStatus::InProgress,
    TaskStatus::Completed,
    TaskStatus::Cancelled,
];

/// Domain of generated email addresses
const SEED_EMAIL_DOMAIN: &str = "tasktrail.local";

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TaskSeedStats {
    pub created: u64,
    pub updated: u64,
    pub deleted: u64,
    pub failed: u64,

    /// Ticks skipped because no active user existed
    pub idle_ticks: u64,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct UserSeedStats {
    pub created: u64,
    pub with_avatar: u64,
    pub sessions: u64,
    pub failed: u64,
}

/// Avatar image handed to generated users
#[derive(Debug, Clone)]
pub struct SeedImage {
    pub content_type: String,
    pub data: Bytes,
}

pub struct TaskSeeder {
    tasks: TaskService,
    users: UserService,
    interval: Duration,
    generated: u64,
    stats: TaskSeedStats,
}

impl TaskSeeder {
    pub fn new(tasks: TaskService, users: UserService, interval: Duration) -> Self {
        Self {
            tasks,
            users,
            interval,
            generated: 0,
            stats: TaskSeedStats::default(),
        }
    }

    pub fn stats(&self) -> TaskSeedStats {
        self.stats
    }

    pub async fn run(mut self, shutdown: CancellationToken) -> TaskSeedStats {
        info!(interval_ms = self.interval.as_millis() as u64, "Task seeder started");

        let mut ticker = tokio::time::interval(self.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                biased;
                _ = shutdown.cancelled() => break,
                _ = ticker.tick() => {}
            }
            self.tick().await;
        }

        info!(
            created = self.stats.created,
            updated = self.stats.updated,
            deleted = self.stats.deleted,
            failed = self.stats.failed,
            "Task seeder stopped"
        );
        self.stats
    }

    /// Generates one task for the next active user
    pub async fn tick(&mut self) {
        let owners: Vec<User> = match self.users.list_users().await {
            Ok(users) => users.into_iter().filter(|u| u.is_active).collect(),
            Err(e) => {
                warn!(error = %e, "Failed to list users for task seeding");
                self.stats.failed += 1;
                return;
            }
        };

        if owners.is_empty() {
            debug!("No active users yet, skipping task generation");
            self.stats.idle_ticks += 1;
            return;
        }

        self.generated += 1;
        let n = self.generated;
        let owner = owners[((n - 1) % owners.len() as u64) as usize].id;

        if let Err(e) = self.generate(n, owner).await {
            warn!(n, owner, error = %e, "Task generation failed");
            self.stats.failed += 1;
        }

        if n % 10 == 0 {
            self.log_totals(&owners).await;
        }
    }

    async fn generate(&mut self, n: u64, owner: i64) -> ServiceResult<()> {
        let task = self
            .tasks
            .create_task(
                owner,
                CreateTask {
                    title: format!("Generated task #{n}"),
                    description: format!("Generated for user {owner}"),
                    status: STATUS_CYCLE[(n % 4) as usize],
                    owner_id: owner,
                },
            )
            .await?;
        self.stats.created += 1;

        if n % 3 == 0 {
            let update = TaskUpdate {
                title: Some(format!("Updated task #{n}")),
                description: None,
                status: Some(TaskStatus::Completed),
            };
            self.tasks.update_task(task.id, owner, update).await?;
            self.stats.updated += 1;
        }

        if n % 5 == 0 {
            self.tasks.delete_task(task.id, owner).await?;
            self.stats.deleted += 1;
        }

        Ok(())
    }

    async fn log_totals(&self, owners: &[User]) {
        let mut total = 0;
        for owner in owners {
            match self.tasks.list_tasks(owner.id, None).await {
                Ok(tasks) => total += tasks.len(),
                Err(e) => warn!(user_id = owner.id, error = %e, "Failed to count tasks"),
            }
        }

        info!(
            generated = self.generated,
            stored = total,
            users = owners.len(),
            "Task seeder progress"
        );
    }
}

pub struct UserSeeder {
    users: UserService,
    auth: AuthService,
    images: Vec<SeedImage>,
    interval: Duration,
    max_users: u32,

    /// Keeps generated emails unique across restarts
    run_id: String,
    attempted: u32,
    stats: UserSeedStats,
}

impl UserSeeder {
    pub fn new(
        users: UserService,
        auth: AuthService,
        images: Vec<SeedImage>,
        interval: Duration,
        max_users: u32,
    ) -> Self {
        let mut run_id = Uuid::new_v4().simple().to_string();
        run_id.truncate(8);

        Self {
            users,
            auth,
            images,
            interval,
            max_users,
            run_id,
            attempted: 0,
            stats: UserSeedStats::default(),
        }
    }

    pub fn stats(&self) -> UserSeedStats {
        self.stats
    }

    pub async fn run(mut self, shutdown: CancellationToken) -> UserSeedStats {
        info!(
            max_users = self.max_users,
            images = self.images.len(),
            "User seeder started"
        );

        let mut ticker = tokio::time::interval(self.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                biased;
                _ = shutdown.cancelled() => break,
                _ = ticker.tick() => {}
            }
            if !self.tick(&shutdown).await {
                info!(max_users = self.max_users, "User seeder reached its limit");
                break;
            }
        }

        info!(
            created = self.stats.created,
            with_avatar = self.stats.with_avatar,
            failed = self.stats.failed,
            "User seeder stopped"
        );
        self.stats
    }

    /// Creates the next user; `false` once `max_users` have been attempted
    pub async fn tick(&mut self, shutdown: &CancellationToken) -> bool {
        if self.attempted >= self.max_users {
            return false;
        }
        self.attempted += 1;
        let n = self.attempted;

        let request = CreateUserRequest {
            name: format!("Auto User {n}"),
            email: Some(format!("auto_user_{}_{n}@{SEED_EMAIL_DOMAIN}", self.run_id)),
            password: format!("seed{}9", Uuid::new_v4().simple()),
        };

        let created = match self.images.get((n as usize - 1) % self.images.len().max(1)) {
            Some(image) => {
                self.users
                    .create_user_with_avatar(
                        request,
                        &image.content_type,
                        image.data.clone(),
                        shutdown.clone(),
                    )
                    .await
            }
            None => self.users.create_user(request).await.map(|user| (user, None)),
        };

        let (user, avatar) = match created {
            Ok(created) => created,
            Err(e) => {
                warn!(n, error = %e, "User generation failed");
                self.stats.failed += 1;
                return true;
            }
        };
        self.stats.created += 1;
        if avatar.is_some() {
            self.stats.with_avatar += 1;
        }

        match self.auth.start_session(&user).await {
            Ok(_) => self.stats.sessions += 1,
            Err(e) => warn!(user_id = user.id, error = %e, "Failed to issue refresh token"),
        }

        debug!(user_id = user.id, n, "Generated user");
        true
    }
}

/// Reads every image in `dir`, in file name order
///
/// Files whose extension is not a known image type are skipped.
pub async fn load_seed_images(dir: &Path) -> std::io::Result<Vec<SeedImage>> {
    let mut entries = tokio::fs::read_dir(dir).await?;
    let mut found = Vec::new();

    while let Some(entry) = entries.next_entry().await? {
        let path = entry.path();
        let Some(content_type) = path
            .extension()
            .and_then(|ext| ext.to_str())
            .and_then(image_content_type)
        else {
            continue;
        };
        found.push((path, content_type));
    }
    found.sort();

    let mut images = Vec::with_capacity(found.len());
    for (path, content_type) in found {
        images.push(SeedImage {
            content_type: content_type.to_string(),
            data: Bytes::from(tokio::fs::read(&path).await?),
        });
    }
    Ok(images)
}

fn image_content_type(extension: &str) -> Option<&'static str> {
    match extension.to_ascii_lowercase().as_str() {
        "jpg" | "jpeg" => Some("image/jpeg"),
        "png" => Some("image/png"),
        "gif" => Some("image/gif"),
        "webp" => Some("image/webp"),
        _ => None,
    }
}

/// Running seeders, joined after the server stops
pub struct SeederHandles {
    tasks: JoinHandle<TaskSeedStats>,
    users: JoinHandle<UserSeedStats>,
}

impl SeederHandles {
    pub async fn join(self) -> anyhow::Result<(TaskSeedStats, UserSeedStats)> {
        Ok((self.tasks.await?, self.users.await?))
    }
}

/// Starts both seeders over the server's services
pub async fn spawn(
    state: &AppState,
    settings: &SeedSettings,
    shutdown: CancellationToken,
) -> anyhow::Result<SeederHandles> {
    let images = match &settings.avatar_dir {
        Some(dir) => load_seed_images(dir).await?,
        None => Vec::new(),
    };
    if images.is_empty() {
        warn!("No seed avatar images found, generated users get no avatar");
    }

    let tasks = TaskSeeder::new(
        state.tasks.clone(),
        state.users.clone(),
        settings.task_interval,
    );
    let users = UserSeeder::new(
        state.users.clone(),
        state.auth.clone(),
        images,
        settings.user_interval,
        settings.max_users,
    );

    Ok(SeederHandles {
        tasks: tokio::spawn(tasks.run(shutdown.clone())),
        users: tokio::spawn(users.run(shutdown)),
    })
}
