//! Integration tests for the room engine
//!
//! These tests drive rooms through the public API the way a transport layer
//! would: members connect, edit the playlist, steer playback and get banned.
//!
//! Run with: cargo test --test integration_tests

use std::io::Write;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::json;
use tokio_util::sync::CancellationToken;

use synctv_room::{
    cache::VendorUserCaches,
    config::GlobalSettings,
    models::{
        AdminPermissions, BaseMovie, Movie, PageParams, Permissions, RoomId, RoomSettings,
        UserId, VendorInfo,
    },
    room::{BroadcastOptions, ClientReceiver, Message},
    storage::{MemoryStorage, RoomStorage, VendorCredentials},
    vendor::{
        PathRequest, PathStat, PlayUrl, VendorClient, VendorProfile, VendorRegistry,
        TRANSCODING_PROVIDER,
    },
    Config, Error, ErrorKind, Result, RoomDeps, RoomInfo, RoomManager,
};

fn deps_from(config: &Config, storage: Arc<MemoryStorage>, vendors: VendorRegistry) -> RoomDeps {
    let storage: Arc<dyn RoomStorage> = storage;
    let vendors = Arc::new(vendors);
    RoomDeps {
        vendor_users: Arc::new(VendorUserCaches::new(
            Arc::clone(&storage),
            Arc::clone(&vendors),
            config.vendor.user_ttl(),
        )),
        storage,
        live: None,
        settings: Arc::new(config.clone()) as Arc<dyn GlobalSettings>,
        hub: config.hub.clone(),
        movie_ttl: config.vendor.movie_ttl(),
    }
}

fn room_info(id: &str, settings: RoomSettings) -> RoomInfo {
    RoomInfo {
        id: RoomId::from(id),
        creator_id: UserId::from("owner"),
        settings,
        hashed_password: String::new(),
    }
}

fn movie(creator: &str, name: &str) -> Movie {
    Movie::new(
        UserId::from(creator),
        BaseMovie {
            name: name.to_string(),
            url: format!("https://cdn.example.com/{name}.m3u8"),
            ..BaseMovie::default()
        },
    )
}

fn drain(receiver: &mut ClientReceiver) -> Vec<Arc<Message>> {
    let mut messages = vec![];
    while let Some(message) = receiver.try_recv() {
        messages.push(message);
    }
    messages
}

/// Counts vendor round trips and serves a fixed file
struct FakeVendor {
    logins: AtomicUsize,
    stats: AtomicUsize,
    provider: &'static str,
}

impl FakeVendor {
    fn new(provider: &'static str) -> Self {
        Self {
            logins: AtomicUsize::new(0),
            stats: AtomicUsize::new(0),
            provider,
        }
    }
}

#[async_trait]
impl VendorClient for FakeVendor {
    async fn identify(&self, _host: &str) -> Result<VendorProfile> {
        Ok(VendorProfile {
            username: "guest".to_string(),
        })
    }

    async fn authenticate(&self, _host: &str, username: &str, _hashed_password: &str) -> Result<String> {
        self.logins.fetch_add(1, Ordering::SeqCst);
        Ok(format!("token-{username}"))
    }

    async fn stat_path(&self, request: &PathRequest) -> Result<PathStat> {
        self.stats.fetch_add(1, Ordering::SeqCst);
        if request.token.is_empty() {
            return Err(Error::PermissionDenied("missing token".to_string()));
        }
        Ok(PathStat {
            is_dir: request.path.ends_with('/'),
            raw_url: format!("{}/d{}", request.host, request.path),
            provider: self.provider.to_string(),
        })
    }

    async fn alternate_access(&self, request: &PathRequest, method: &str) -> Result<Vec<PlayUrl>> {
        Ok(["1080p", "720p"]
            .into_iter()
            .map(|label| PlayUrl {
                url: format!("{}/{method}/{label}{}", request.host, request.path),
                label: label.to_string(),
            })
            .collect())
    }
}

#[tokio::test]
async fn test_watch_session() {
    let config = Config::default();
    let manager = RoomManager::new(deps_from(
        &config,
        Arc::new(MemoryStorage::new()),
        VendorRegistry::new(),
    ));
    let room = manager.load_or_insert(room_info("session", RoomSettings::default()));
    let owner = UserId::from("owner");
    let alice = UserId::from("alice");

    let (owner_conn, mut owner_rx) = room.new_client(owner.clone()).await.unwrap();
    let (_alice_conn, mut alice_rx) = room.new_client(alice.clone()).await.unwrap();
    assert_eq!(room.people_num(), 2);
    drain(&mut owner_rx);
    drain(&mut alice_rx);

    room.check_permission(&alice, Permissions::ADD_MOVIE).await.unwrap();
    let first = room.add_movie(movie("alice", "pilot")).await.unwrap();
    room.add_movie(movie("alice", "finale")).await.unwrap();

    room.check_permission(&owner, Permissions::SET_CURRENT_MOVIE)
        .await
        .unwrap();
    let current = room.set_current_movie(Some(first.id()), true).await.unwrap();
    assert_eq!(current.movie_id.as_ref(), Some(first.id()));

    let seen = drain(&mut alice_rx);
    assert!(seen.iter().any(|m| m.message_type() == "movies_changed"));
    assert!(seen
        .iter()
        .any(|m| matches!(m.as_ref(), Message::Current(c) if c.movie_id.as_ref() == Some(first.id()))));

    // alice lacks the status bit by default
    assert!(room
        .check_permission(&alice, Permissions::SET_CURRENT_STATUS)
        .await
        .is_err());
    let status = room.set_current_status(false, 42.0, 1.0, 0.0).unwrap();
    let options = BroadcastOptions::default().ignore_connection(owner_conn.connection_id().clone());
    assert_eq!(room.broadcast(Message::Status(status), &options).await, 1);
    assert_eq!(*alice_rx.recv().await.unwrap(), Message::Status(status));
    assert!(drain(&mut owner_rx)
        .iter()
        .all(|m| m.message_type() != "status"));

    let page = room
        .movies_page(PageParams::default(), Some(&alice))
        .await
        .unwrap();
    assert_eq!(page.total, 2);
    assert_eq!(page.items[0].base.name, "pilot");

    assert_eq!(manager.close_idle_rooms(), 0);
    room.unregister_client(&owner_conn);
    drop(room);
    manager.close_all();
    assert!(manager.is_empty());
    assert!(alice_rx.recv().await.is_none());
}

#[tokio::test]
async fn test_moderation_flow() {
    let storage = Arc::new(MemoryStorage::new());
    let manager = RoomManager::new(deps_from(
        &Config::default(),
        Arc::clone(&storage),
        VendorRegistry::new(),
    ));
    let room = manager.load_or_insert(room_info(
        "moderated",
        RoomSettings {
            join_need_review: true,
            ..RoomSettings::default()
        },
    ));
    let owner = UserId::from("owner");
    let mallory = UserId::from("mallory");
    let bob = UserId::from("bob");

    assert!(room.resolve_member_status(&mallory).await.unwrap().is_pending());

    room.check_admin_permission(&owner, AdminPermissions::APPROVE_PENDING_MEMBER)
        .await
        .unwrap();
    room.approve_pending_member(&mallory).await.unwrap();
    room.resolve_member(&bob).await.unwrap();
    room.approve_pending_member(&bob).await.unwrap();
    room.set_admin(&bob, AdminPermissions::BAN_ROOM_MEMBER)
        .await
        .unwrap();

    let (mallory_conn, mut mallory_rx) = room.new_client(mallory.clone()).await.unwrap();
    room.check_admin_permission(&bob, AdminPermissions::BAN_ROOM_MEMBER)
        .await
        .unwrap();
    room.ban_member(&mallory).await.unwrap();

    assert!(mallory_conn.is_closed());
    drain(&mut mallory_rx);
    assert!(mallory_rx.recv().await.is_none());
    let err = room.new_client(mallory.clone()).await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::PermissionDenied);

    // admins cannot touch the creator
    let err = room.ban_member(&owner).await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::InvalidOperation);
    assert!(room.new_client(owner).await.is_ok());
}

#[tokio::test]
async fn test_room_toggles_override_member_bits() {
    let manager = RoomManager::new(deps_from(
        &Config::default(),
        Arc::new(MemoryStorage::new()),
        VendorRegistry::new(),
    ));
    let room = manager.load_or_insert(room_info("toggles", RoomSettings::default()));
    let owner = UserId::from("owner");
    let carol = UserId::from("carol");
    room.resolve_member(&carol).await.unwrap();
    room.set_admin(&carol, AdminPermissions::DEFAULT).await.unwrap();
    assert!(room.has_permission(&carol, Permissions::SEND_CHAT_MESSAGE).await);

    let patch = json!({ "can_send_chat_message": false });
    room.update_settings(patch.as_object().unwrap()).await.unwrap();

    assert!(!room.has_permission(&carol, Permissions::SEND_CHAT_MESSAGE).await);
    assert!(room.has_permission(&owner, Permissions::SEND_CHAT_MESSAGE).await);
}

#[tokio::test]
async fn test_password_rotation() {
    let storage = Arc::new(MemoryStorage::new());
    let manager = RoomManager::new(deps_from(
        &Config::default(),
        Arc::clone(&storage),
        VendorRegistry::new(),
    ));
    let room = manager.load_or_insert(room_info("locked", RoomSettings::default()));

    room.set_password("hunter2").await.unwrap();
    let issued = room.version();
    assert!(room.check_password("hunter2").await.unwrap());

    room.set_password("correct horse").await.unwrap();
    assert!(!room.check_version(issued));
    assert!(!room.check_password("hunter2").await.unwrap());

    // reopening from the persisted hash keeps the version
    let reopened_info = RoomInfo {
        hashed_password: storage.hashed_password(&RoomId::from("locked")).unwrap(),
        ..room_info("locked-copy", RoomSettings::default())
    };
    let reopened = manager.load_or_insert(reopened_info);
    assert_eq!(reopened.version(), room.version());
    assert!(reopened.check_password("correct horse").await.unwrap());
}

#[tokio::test]
async fn test_vendor_movie_urls_are_cached() {
    let storage = Arc::new(MemoryStorage::new());
    storage.put_vendor_credentials(
        UserId::from("alice"),
        VendorCredentials {
            backend: "alist".to_string(),
            host: "http://alist.local".to_string(),
            username: "alice".to_string(),
            hashed_password: "hashed".to_string(),
        },
    );
    let vendor = Arc::new(FakeVendor::new(TRANSCODING_PROVIDER));
    let vendors = VendorRegistry::new();
    vendors.register("alist", Arc::clone(&vendor) as Arc<dyn VendorClient>);
    let manager = RoomManager::new(deps_from(&Config::default(), storage, vendors));
    let room = manager.load_or_insert(room_info("vendor", RoomSettings::default()));

    let stored = room
        .add_movie(Movie::new(
            UserId::from("alice"),
            BaseMovie {
                name: "ep1".to_string(),
                vendor: Some(VendorInfo {
                    backend: "alist".to_string(),
                    path: "/shows/ep1.mkv".to_string(),
                    password: String::new(),
                }),
                ..BaseMovie::default()
            },
        ))
        .await
        .unwrap();
    let folder = room
        .add_movie(Movie::new(
            UserId::from("alice"),
            BaseMovie {
                name: "season".to_string(),
                vendor: Some(VendorInfo {
                    backend: "alist".to_string(),
                    path: "/shows/".to_string(),
                    password: String::new(),
                }),
                ..BaseMovie::default()
            },
        ))
        .await
        .unwrap();
    let ctx = CancellationToken::new();

    let urls = room.movie_play_urls(&ctx, stored.id()).await.unwrap();
    assert_eq!(urls.len(), 2);
    assert_eq!(urls[0].label, "1080p");
    room.movie_play_urls(&ctx, stored.id()).await.unwrap();
    assert_eq!(vendor.stats.load(Ordering::SeqCst), 1);

    let err = room.movie_play_urls(&ctx, folder.id()).await.unwrap_err();
    assert!(matches!(err, Error::NotPlayable(_)));
    // one login shared by both movies of the same creator
    assert_eq!(vendor.logins.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_unbound_vendor_user() {
    let vendors = VendorRegistry::new();
    vendors.register("alist", Arc::new(FakeVendor::new("Local")) as Arc<dyn VendorClient>);
    let manager = RoomManager::new(deps_from(
        &Config::default(),
        Arc::new(MemoryStorage::new()),
        vendors,
    ));
    let room = manager.load_or_insert(room_info("unbound", RoomSettings::default()));
    let movie = room
        .add_movie(Movie::new(
            UserId::from("bob"),
            BaseMovie {
                name: "x".to_string(),
                vendor: Some(VendorInfo {
                    backend: "alist".to_string(),
                    path: "/x.mp4".to_string(),
                    password: String::new(),
                }),
                ..BaseMovie::default()
            },
        ))
        .await
        .unwrap();

    let err = room
        .movie_play_urls(&CancellationToken::new(), movie.id())
        .await
        .unwrap_err();
    assert!(matches!(err, Error::VendorNotBound(_)));
}

#[tokio::test]
async fn test_config_file_drives_hub_and_guests() {
    let mut file = tempfile::Builder::new().suffix(".toml").tempfile().unwrap();
    write!(
        file,
        "[guest]\nenabled = false\n\n[hub]\nmax_connections = 2\nclient_queue_size = 4"
    )
    .unwrap();
    let config = Config::from_file(file.path().to_str().unwrap()).unwrap();

    let manager = RoomManager::new(deps_from(
        &config,
        Arc::new(MemoryStorage::new()),
        VendorRegistry::new(),
    ));
    let room = manager.load_or_insert(room_info("small", RoomSettings::default()));

    let err = room.resolve_member(&UserId::guest()).await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::PermissionDenied);

    let _a = room.new_client(UserId::from("a")).await.unwrap();
    let _b = room.new_client(UserId::from("b")).await.unwrap();
    let err = room.new_client(UserId::from("c")).await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::ResourceExhausted);
}

#[tokio::test(start_paused = true)]
async fn test_idle_rooms_are_reclaimed() {
    let manager = RoomManager::new(deps_from(
        &Config::default(),
        Arc::new(MemoryStorage::new()),
        VendorRegistry::new(),
    ));
    let busy = manager.load_or_insert(room_info("busy", RoomSettings::default()));
    let _quiet = manager.load_or_insert(room_info("quiet", RoomSettings::default()));
    let (conn, _rx) = busy.new_client(UserId::from("owner")).await.unwrap();

    tokio::time::sleep(Duration::from_secs(60)).await;
    assert_eq!(manager.close_idle_rooms(), 1);

    busy.unregister_client(&conn);
    assert_eq!(manager.close_idle_rooms(), 1);
    assert!(manager.is_empty());
}
