use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use conductor_tracking::directory::{ActiveConductorDirectory, RefreshPolicy};
use conductor_tracking::feed::ChannelPositionSource;
use conductor_tracking::memory::MemoryBackend;
use conductor_tracking::models::{Conductor, ConductorStatus, PositionSample};
use conductor_tracking::publisher::{ActiveRowFilter, LocationPublisher, PublishError};
use conductor_tracking::session::DriverSession;
use conductor_tracking::watcher::{PositionEvent, WatchOptions};
use tokio::sync::watch;
use uuid::Uuid;

const D1: Uuid = Uuid::from_u128(0xd1);
const D2: Uuid = Uuid::from_u128(0xd2);

fn backend() -> Arc<MemoryBackend> {
    let backend = Arc::new(MemoryBackend::new());
    backend.add_conductor(Conductor {
        id: D1,
        name: "Duarte".to_string(),
        whatsapp: Some("+351910000001".to_string()),
        is_active: true,
    });
    backend.add_conductor(Conductor {
        id: D2,
        name: "Diana".to_string(),
        whatsapp: None,
        is_active: true,
    });
    backend.set_active(D1, true);
    backend.set_active(D2, false);
    backend
}

async fn next_update(rx: &mut watch::Receiver<u64>) {
    tokio::time::timeout(Duration::from_secs(2), rx.changed())
        .await
        .expect("directory never reached the expected state")
        .unwrap();
}

async fn run_d1_scenario(policy: RefreshPolicy) {
    let backend = backend();
    let directory = Arc::new(ActiveConductorDirectory::new(
        backend.clone(),
        backend.clone(),
        policy,
    ));
    directory.mount().await.unwrap();
    let mut updates = directory.subscribe_updates();

    let (source, fixes) = ChannelPositionSource::new();
    let session = DriverSession::start(
        D1,
        Arc::new(source),
        backend.clone(),
        WatchOptions::default(),
        Duration::from_secs(3600),
    );

    let t0 = Utc::now();
    fixes
        .send(PositionEvent::Fix(
            PositionSample::new(37.7250, -8.7830, t0).with_accuracy(5.0),
        ))
        .unwrap();
    {
        let probe = backend.clone();
        let check = move || probe.row(D1).and_then(|r| r.latitude) == Some(37.7250);
        let deadline = tokio::time::Instant::now() + Duration::from_secs(2);
        while !check() {
            assert!(tokio::time::Instant::now() < deadline, "initial fix not published");
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    }

    fixes
        .send(PositionEvent::Fix(
            PositionSample::new(37.7251, -8.7831, t0 + chrono::Duration::milliseconds(5000))
                .with_accuracy(5.0),
        ))
        .unwrap();

    let view = directory.clone();
    loop {
        let snapshot = view.snapshot().await;
        let entry = snapshot.get(&D1).cloned();
        if entry.as_ref().and_then(|e| e.latitude) == Some(37.7251) {
            let entry = entry.unwrap();
            assert_eq!(entry.longitude, Some(-8.7831));
            assert_eq!(entry.name, "Duarte");
            assert!(entry.updated_at.is_some());
            break;
        }
        next_update(&mut updates).await;
    }

    assert!(directory.snapshot().await.get(&D2).is_none());
    assert_eq!(session.stats().published, 2);

    session.stop().await;
    directory.unmount();
}

#[tokio::test]
async fn test_active_conductor_movement_reaches_directory_with_refetch() {
    run_d1_scenario(RefreshPolicy::Refetch).await;
}

#[tokio::test]
async fn test_active_conductor_movement_reaches_directory_with_delta() {
    run_d1_scenario(RefreshPolicy::Delta).await;
}

#[tokio::test]
async fn test_inactive_conductor_write_affects_nothing() {
    let backend = backend();
    let directory = ActiveConductorDirectory::new(backend.clone(), backend.clone(), RefreshPolicy::Refetch);
    directory.mount().await.unwrap();
    let before = backend.row(D2).unwrap();

    let publisher = LocationPublisher::new(backend.clone());
    let result = publisher
        .publish(D2, &PositionSample::new(37.7300, -8.7900, Utc::now()))
        .await;
    assert!(matches!(result, Err(PublishError::SkippedInactive(id)) if id == D2));

    let after = backend.row(D2).unwrap();
    assert_eq!(after, before);
    assert!(after.updated_at.is_none());

    let write = backend.writes().pop().unwrap();
    assert_eq!(write.filter, ActiveRowFilter::for_conductor(D2));
    assert_eq!(write.rows_affected, 0);

    directory.refresh().await.unwrap();
    assert!(directory.snapshot().await.get(&D2).is_none());
    directory.unmount();
}

#[tokio::test]
async fn test_deactivation_and_removal_leave_directory() {
    let backend = backend();
    let directory = ActiveConductorDirectory::new(backend.clone(), backend.clone(), RefreshPolicy::Delta);
    directory.mount().await.unwrap();
    let mut updates = directory.subscribe_updates();
    assert!(directory.snapshot().await.get(&D1).is_some());

    let publisher = LocationPublisher::new(backend.clone());
    publisher
        .set_status(D1, false, ConductorStatus::OnTour)
        .await
        .unwrap();
    next_update(&mut updates).await;
    let snapshot = directory.snapshot().await;
    assert_eq!(snapshot.get(&D1).unwrap().status(), Some(ConductorStatus::OnTour));

    backend.remove(D1);
    next_update(&mut updates).await;
    assert!(directory.snapshot().await.entries.is_empty());

    // late write after removal must not bring the row back
    let late = publisher
        .publish(D1, &PositionSample::new(37.7251, -8.7831, Utc::now()))
        .await;
    assert!(late.is_err());
    assert!(backend.row(D1).is_none());
    directory.unmount();
}
