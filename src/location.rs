use async_trait::async_trait;
use log::{ error, info, warn };
use std::sync::Arc;
use std::sync::Mutex as StdMutex;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::{ interval, timeout, MissedTickBehavior };

use crate::connection::IntentSender;
use crate::error::GeoError;
use crate::models::envelope::ClientIntent;

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Position {
    pub latitude: f64,
    pub longitude: f64,
    pub heading: Option<f64>,
    pub speed: Option<f64>,
}

/// Device positioning capability. Implementations should return a fresh,
/// high-accuracy fix (no cached positions); the publisher enforces the
/// per-request timeout.
#[async_trait]
pub trait GeolocationProvider: Send + Sync + 'static {
    async fn current_position(&self) -> Result<Position, GeoError>;
}

#[derive(Clone, Debug, PartialEq)]
pub enum SharingStatus {
    Idle,
    Active,
    /// Sharing halted on a non-recoverable error; needs user intervention.
    Failed(String),
}

/// Rider-only: samples the device position on a fixed interval and pushes
/// each fix through the channel while sharing is active. There is no
/// maximum session duration; the caller stops sharing at delivery
/// completion.
pub struct LocationPublisher {
    geo: Arc<dyn GeolocationProvider>,
    channel: Arc<dyn IntentSender>,
    order_id: Option<String>,
    sample_interval: Duration,
    request_timeout: Duration,
    status: Arc<watch::Sender<SharingStatus>>,
    status_rx: watch::Receiver<SharingStatus>,
    task: Option<JoinHandle<()>>,
}

impl LocationPublisher {
    pub fn new(
        geo: Arc<dyn GeolocationProvider>,
        channel: Arc<dyn IntentSender>,
        order_id: Option<String>
    ) -> Self {
        let (status, status_rx) = watch::channel(SharingStatus::Idle);
        Self {
            geo,
            channel,
            order_id,
            sample_interval: Duration::from_secs(10),
            request_timeout: Duration::from_secs(5),
            status: Arc::new(status),
            status_rx,
            task: None,
        }
    }

    pub fn with_intervals(mut self, sample: Duration, request_timeout: Duration) -> Self {
        self.sample_interval = sample;
        self.request_timeout = request_timeout;
        self
    }

    /// Observe sharing state; the UI surfaces `Failed` as an actionable
    /// error.
    pub fn status(&self) -> watch::Receiver<SharingStatus> {
        self.status_rx.clone()
    }

    pub fn is_active(&self) -> bool {
        self.task
            .as_ref()
            .map(|t| !t.is_finished())
            .unwrap_or(false)
    }

    pub fn start(&mut self) {
        if self.is_active() {
            return;
        }
        let geo = self.geo.clone();
        let channel = self.channel.clone();
        let order_id = self.order_id.clone();
        let status = self.status.clone();
        let sample_interval = self.sample_interval;
        let request_timeout = self.request_timeout;

        let _ = status.send(SharingStatus::Active);
        info!("Location sharing started (every {:?})", sample_interval);

        self.task = Some(
            tokio::spawn(async move {
                let mut ticker = interval(sample_interval);
                ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
                loop {
                    ticker.tick().await;
                    let fix = match timeout(request_timeout, geo.current_position()).await {
                        Ok(Ok(position)) => position,
                        Ok(Err(e)) if !e.is_recoverable() => {
                            error!("Location sharing halted: {}", e);
                            let _ = status.send(SharingStatus::Failed(e.to_string()));
                            return;
                        }
                        Ok(Err(e)) => {
                            warn!("Transient geolocation error: {} (retrying next tick)", e);
                            continue;
                        }
                        Err(_) => {
                            warn!("Position request timed out (retrying next tick)");
                            continue;
                        }
                    };
                    channel.send_intent(
                        ClientIntent::location(fix.latitude, fix.longitude, order_id.clone())
                    ).await;
                }
            })
        );
    }

    pub fn stop(&mut self) {
        if let Some(task) = self.task.take() {
            task.abort();
            let _ = self.status.send(SharingStatus::Idle);
            info!("Location sharing stopped");
        }
    }
}

impl Drop for LocationPublisher {
    fn drop(&mut self) {
        if let Some(task) = self.task.take() {
            task.abort();
        }
    }
}

/// Canned route provider for demos and rider-path testing: walks a fixed
/// list of waypoints, repeating the last one once exhausted.
pub struct FixedRouteProvider {
    waypoints: StdMutex<Vec<Position>>,
    cursor: StdMutex<usize>,
}

impl FixedRouteProvider {
    pub fn new(waypoints: Vec<(f64, f64)>) -> Self {
        let waypoints = waypoints
            .into_iter()
            .map(|(latitude, longitude)| Position {
                latitude,
                longitude,
                heading: None,
                speed: None,
            })
            .collect();
        Self {
            waypoints: StdMutex::new(waypoints),
            cursor: StdMutex::new(0),
        }
    }
}

#[async_trait]
impl GeolocationProvider for FixedRouteProvider {
    async fn current_position(&self) -> Result<Position, GeoError> {
        let waypoints = self.waypoints.lock().unwrap();
        if waypoints.is_empty() {
            return Err(GeoError::Unavailable("empty route".into()));
        }
        let mut cursor = self.cursor.lock().unwrap();
        let position = waypoints[(*cursor).min(waypoints.len() - 1)];
        *cursor += 1;
        Ok(position)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::VecDeque;
    use tokio::time::sleep;

    struct RecordingSender {
        intents: StdMutex<Vec<ClientIntent>>,
    }

    impl RecordingSender {
        fn new() -> Arc<Self> {
            Arc::new(Self { intents: StdMutex::new(Vec::new()) })
        }

        fn locations(&self) -> Vec<(f64, f64, Option<String>)> {
            self.intents
                .lock()
                .unwrap()
                .iter()
                .filter_map(|intent| {
                    match intent {
                        ClientIntent::Message { metadata: Some(meta), order_id, .. } =>
                            Some((
                                meta["lat"].as_f64().unwrap(),
                                meta["lng"].as_f64().unwrap(),
                                order_id.clone(),
                            )),
                        _ => None,
                    }
                })
                .collect()
        }
    }

    #[async_trait]
    impl IntentSender for RecordingSender {
        async fn send_intent(&self, intent: ClientIntent) {
            self.intents.lock().unwrap().push(intent);
        }
    }

    struct ScriptedGeo {
        responses: StdMutex<VecDeque<Result<Position, GeoError>>>,
    }

    impl ScriptedGeo {
        fn new(responses: Vec<Result<Position, GeoError>>) -> Arc<Self> {
            Arc::new(Self { responses: StdMutex::new(responses.into()) })
        }
    }

    #[async_trait]
    impl GeolocationProvider for ScriptedGeo {
        async fn current_position(&self) -> Result<Position, GeoError> {
            self.responses
                .lock()
                .unwrap()
                .pop_front()
                .unwrap_or(Err(GeoError::Unavailable("script exhausted".into())))
        }
    }

    fn position(latitude: f64, longitude: f64) -> Position {
        Position { latitude, longitude, heading: None, speed: None }
    }

    fn fast(publisher: LocationPublisher) -> LocationPublisher {
        publisher.with_intervals(Duration::from_millis(20), Duration::from_millis(200))
    }

    #[tokio::test]
    async fn publishes_fixes_bound_to_the_order() {
        let sender = RecordingSender::new();
        let geo = ScriptedGeo::new(
            vec![Ok(position(5.4164, 100.3327)), Ok(position(5.42, 100.33))]
        );
        let mut publisher = fast(
            LocationPublisher::new(geo, sender.clone(), Some("ord-1".into()))
        );
        publisher.start();

        for _ in 0..100 {
            if sender.locations().len() >= 2 {
                break;
            }
            sleep(Duration::from_millis(5)).await;
        }
        publisher.stop();

        let locations = sender.locations();
        assert!(locations.len() >= 2);
        assert_eq!(locations[0], (5.4164, 100.3327, Some("ord-1".into())));
        assert_eq!(locations[1], (5.42, 100.33, Some("ord-1".into())));
    }

    #[tokio::test]
    async fn permission_error_halts_sharing() {
        let sender = RecordingSender::new();
        let geo = ScriptedGeo::new(vec![Err(GeoError::PermissionDenied)]);
        let mut publisher = fast(LocationPublisher::new(geo, sender.clone(), None));
        let mut status = publisher.status();
        publisher.start();

        for _ in 0..100 {
            if matches!(*status.borrow_and_update(), SharingStatus::Failed(_)) {
                break;
            }
            sleep(Duration::from_millis(5)).await;
        }
        assert!(matches!(*status.borrow(), SharingStatus::Failed(_)));
        sleep(Duration::from_millis(60)).await;
        assert!(sender.locations().is_empty());
        assert!(!publisher.is_active());
    }

    #[tokio::test]
    async fn transient_error_is_retried_on_next_tick() {
        let sender = RecordingSender::new();
        let geo = ScriptedGeo::new(
            vec![Err(GeoError::Unavailable("no gps lock".into())), Ok(position(5.42, 100.33))]
        );
        let mut publisher = fast(LocationPublisher::new(geo, sender.clone(), None));
        publisher.start();

        for _ in 0..100 {
            if !sender.locations().is_empty() {
                break;
            }
            sleep(Duration::from_millis(5)).await;
        }
        publisher.stop();
        assert_eq!(sender.locations()[0].0, 5.42);
    }

    #[tokio::test]
    async fn stop_halts_publishing() {
        let sender = RecordingSender::new();
        let geo: Arc<FixedRouteProvider> = Arc::new(
            FixedRouteProvider::new(vec![(5.4164, 100.3327), (5.42, 100.33)])
        );
        let mut publisher = fast(LocationPublisher::new(geo, sender.clone(), None));
        publisher.start();
        assert!(publisher.is_active());

        for _ in 0..100 {
            if !sender.locations().is_empty() {
                break;
            }
            sleep(Duration::from_millis(5)).await;
        }
        publisher.stop();
        assert!(!publisher.is_active());

        let count = sender.locations().len();
        sleep(Duration::from_millis(100)).await;
        assert_eq!(sender.locations().len(), count);
        assert_eq!(*publisher.status().borrow(), SharingStatus::Idle);
    }

    #[tokio::test]
    async fn fixed_route_repeats_its_last_waypoint() {
        let route = FixedRouteProvider::new(vec![(1.0, 2.0), (3.0, 4.0)]);
        assert_eq!(route.current_position().await.unwrap().latitude, 1.0);
        assert_eq!(route.current_position().await.unwrap().latitude, 3.0);
        assert_eq!(route.current_position().await.unwrap().latitude, 3.0);
    }
}
