//! Integration tests for the AHT20 exporter.
//!
//! These tests drive the real AHT20 driver over the simulated bus, through
//! the poll loop, to the HTTP endpoint.

use std::net::SocketAddr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, mpsc};
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use tokio::net::TcpListener;
use tokio::sync::watch;

use aht20_exporter::aht20::Aht20Factory;
use aht20_exporter::bus::simulated::{NoDelay, SimulatedBus};
use aht20_exporter::bus::{self, tca9548a::CHANNEL_COUNT};
use aht20_exporter::config::BusConfig;
use aht20_exporter::poller::poll_once;
use aht20_exporter::{
    ExporterConfig, ExporterError, GaugeKind, GaugeSet, HttpServer, Reading, SensorError,
    SensorFactory, SensorHandle, SensorLabel, SensorPoller, SensorRegistry,
};

/// Helper to build a factory over a simulated bus.
fn simulated_factory(bus: SimulatedBus) -> Aht20Factory<SimulatedBus, NoDelay> {
    Aht20Factory::simulated(&BusConfig::default(), bus)
}

/// Helper to parse Prometheus text format into (series, value) pairs.
fn parse_samples(body: &str) -> Vec<(String, f64)> {
    body.lines()
        .filter(|line| !line.starts_with('#') && !line.trim().is_empty())
        .filter_map(|line| {
            let (series, value) = line.rsplit_once(' ')?;
            Some((series.to_string(), value.parse().ok()?))
        })
        .collect()
}

fn sample(samples: &[(String, f64)], series: &str) -> Option<f64> {
    samples
        .iter()
        .find(|(name, _)| name == series)
        .map(|(_, value)| *value)
}

#[test]
fn test_registry_skips_missing_channel() {
    // Channel 1 has nothing attached
    let bus = SimulatedBus::new(0x70, 0x38).with_sensors([0, 2]);
    let registry = SensorRegistry::build(3, &simulated_factory(bus)).unwrap();

    let labels: Vec<&str> = registry.labels().map(SensorLabel::as_str).collect();
    assert_eq!(labels, vec!["sensor0", "sensor2"]);
}

#[test]
fn test_no_sensor_on_bus_is_fatal() {
    let bus = SimulatedBus::new(0x70, 0x38);
    let result = SensorRegistry::build(3, &simulated_factory(bus));

    assert!(matches!(
        result,
        Err(ExporterError::NoSensors { requested: 3 })
    ));
}

#[test]
fn test_zero_sensors_never_opens_bus() {
    let opened = Arc::new(AtomicUsize::new(0));
    let counter = opened.clone();
    let factory = Aht20Factory::new(&BusConfig::default(), || NoDelay, move || {
        counter.fetch_add(1, Ordering::SeqCst);
        Ok(SimulatedBus::new(0x70, 0x38).with_sensors(0..8))
    });

    let result = SensorRegistry::build(0, &factory);

    assert!(matches!(
        result,
        Err(ExporterError::NoSensors { requested: 0 })
    ));
    assert_eq!(opened.load(Ordering::SeqCst), 0);
}

#[test]
fn test_unreachable_bus_is_fatal() {
    let config = BusConfig {
        adapter: 250,
        ..Default::default()
    };
    let result = SensorRegistry::build(2, &*bus::sensor_factory(&config));

    assert!(matches!(
        result,
        Err(ExporterError::NoSensors { requested: 2 })
    ));
}

#[test]
fn test_count_beyond_multiplexer_skips_extra_indices() {
    let config =
        ExporterConfig::parse("{ sensors: { count: 9, bus: { simulate: true } } }").unwrap();
    let factory = bus::sensor_factory(&config.sensors.bus);

    let registry = SensorRegistry::build(config.sensors.count, &*factory).unwrap();

    assert_eq!(registry.len(), CHANNEL_COUNT);
    let labels: Vec<&str> = registry.labels().map(SensorLabel::as_str).collect();
    assert_eq!(labels.last(), Some(&"sensor7"));
    assert!(!labels.contains(&"sensor8"));
}

#[test]
fn test_poll_publishes_rounded_readings() {
    let bus = SimulatedBus::new(0x70, 0x38)
        .with_fixed_reading(0, Reading::new(20.0, 40.0))
        .with_fixed_reading(1, Reading::new(23.46, 55.04))
        .with_stuck_busy(2);
    let mut registry = SensorRegistry::build(3, &simulated_factory(bus)).unwrap();
    let gauges = GaugeSet::new("aht20");

    let summary = poll_once(&mut registry, &gauges);
    assert_eq!(summary.updated, 2);
    assert_eq!(summary.failed, 1);

    let sensor1 = SensorLabel::for_index(1);
    assert_eq!(gauges.get(GaugeKind::Temperature, &sensor1), Some(23.5));
    assert_eq!(gauges.get(GaugeKind::Humidity, &sensor1), Some(55.0));

    let sensor2 = SensorLabel::for_index(2);
    assert_eq!(gauges.get(GaugeKind::Temperature, &sensor2), None);
    assert_eq!(gauges.stats().reads_failed_transient, 1);
}

#[tokio::test]
async fn test_full_flow_scrape() {
    let bus = SimulatedBus::new(0x70, 0x38)
        .with_fixed_reading(0, Reading::new(21.04, 38.96))
        .with_fixed_reading(1, Reading::new(23.46, 55.04));
    let registry = SensorRegistry::build(2, &simulated_factory(bus)).unwrap();
    let gauges = Arc::new(GaugeSet::new("aht20"));
    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    // Bind on a random port before starting, so the request cannot race the server
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr: SocketAddr = listener.local_addr().unwrap();
    let server = HttpServer::new(gauges.clone(), addr, "/metrics".to_string());
    let server_handle = tokio::spawn(server.serve(listener, shutdown_rx.clone()));

    let poller = SensorPoller::new(registry, gauges.clone(), Duration::from_millis(20));
    let poller_handle = tokio::spawn(poller.run(shutdown_rx));

    // Wait for the first poll
    for _ in 0..100 {
        if gauges.stats().polls > 0 {
            break;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    assert!(gauges.stats().polls > 0, "poller never completed a poll");

    let client = reqwest::Client::new();
    let response = client
        .get(format!("http://{}/metrics", addr))
        .send()
        .await
        .unwrap();
    assert!(response.status().is_success());
    let body = response.text().await.unwrap();

    let samples = parse_samples(&body);
    assert_eq!(
        sample(&samples, "aht20_temperature_celsius{sensor=\"sensor0\"}"),
        Some(21.0)
    );
    assert_eq!(
        sample(&samples, "aht20_humidity{sensor=\"sensor0\"}"),
        Some(39.0)
    );
    assert_eq!(
        sample(&samples, "aht20_temperature_celsius{sensor=\"sensor1\"}"),
        Some(23.5)
    );
    assert_eq!(
        sample(&samples, "aht20_humidity{sensor=\"sensor1\"}"),
        Some(55.0)
    );

    // The root path answers too
    let response = client.get(format!("http://{}/", addr)).send().await.unwrap();
    assert!(response.status().is_success());
    assert!(response.text().await.unwrap().contains("aht20_humidity"));
    drop(client);

    shutdown_tx.send(true).unwrap();
    let _ = tokio::time::timeout(Duration::from_secs(2), poller_handle).await;
    let result = tokio::time::timeout(Duration::from_secs(2), server_handle)
        .await
        .expect("server should stop on shutdown")
        .unwrap();
    assert!(result.is_ok());
}

#[tokio::test]
async fn test_scrapes_without_poll_are_identical() {
    let gauges = Arc::new(GaugeSet::new("aht20"));
    gauges.record(&SensorLabel::for_index(0), &Reading::new(22.2, 47.5));

    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let server = HttpServer::new(gauges, addr, "/metrics".to_string());
    let server_handle = tokio::spawn(server.serve(listener, shutdown_rx));

    let client = reqwest::Client::new();
    let url = format!("http://{}/metrics", addr);
    let first = client.get(&url).send().await.unwrap().text().await.unwrap();
    let second = client.get(&url).send().await.unwrap().text().await.unwrap();

    assert_eq!(first, second);
    assert!(first.contains("aht20_temperature_celsius{sensor=\"sensor0\"} 22.2"));
    drop(client);

    shutdown_tx.send(true).unwrap();
    let _ = tokio::time::timeout(Duration::from_secs(2), server_handle).await;
}

#[tokio::test]
async fn test_concurrent_scrapes_during_polling() {
    let bus = SimulatedBus::new(0x70, 0x38).with_sensors(0..4);
    let registry = SensorRegistry::build(4, &simulated_factory(bus)).unwrap();
    let gauges = Arc::new(GaugeSet::new("aht20"));
    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    let poller = SensorPoller::new(registry, gauges.clone(), Duration::from_millis(1));
    let poller_handle = tokio::spawn(poller.run(shutdown_rx));

    // Render concurrently with the poll loop writing
    let handles: Vec<_> = (0..8)
        .map(|_| {
            let gauges = gauges.clone();
            tokio::spawn(async move {
                for _ in 0..50 {
                    let output = gauges.render();
                    for (series, value) in parse_samples(&output) {
                        if series.starts_with("aht20_temperature_celsius") {
                            assert!((-40.0..=85.0).contains(&value), "{} {}", series, value);
                        }
                    }
                    tokio::task::yield_now().await;
                }
            })
        })
        .collect();

    for handle in handles {
        handle.await.unwrap();
    }

    shutdown_tx.send(true).unwrap();
    let _ = tokio::time::timeout(Duration::from_secs(2), poller_handle).await;
}

/// Blocks inside `read` until released.
struct StalledSensor {
    started: mpsc::Sender<()>,
    release: mpsc::Receiver<()>,
}

impl SensorHandle for StalledSensor {
    fn read(&mut self) -> Result<Reading, SensorError> {
        let _ = self.started.send(());
        let _ = self.release.recv_timeout(Duration::from_secs(5));
        Ok(Reading::new(20.0, 40.0))
    }
}

/// Hands out one prepared sensor.
struct PreparedFactory(Mutex<Option<Box<dyn SensorHandle>>>);

impl SensorFactory for PreparedFactory {
    fn create(&self, _index: usize) -> Result<Box<dyn SensorHandle>, SensorError> {
        self.0
            .lock()
            .take()
            .ok_or_else(|| SensorError::Unexpected("no sensor left".to_string()))
    }
}

#[tokio::test]
async fn test_scrape_not_delayed_by_stalled_read() {
    let (started_tx, started_rx) = mpsc::channel();
    let (release_tx, release_rx) = mpsc::channel();
    let sensor: Box<dyn SensorHandle> = Box::new(StalledSensor {
        started: started_tx,
        release: release_rx,
    });
    let factory = PreparedFactory(Mutex::new(Some(sensor)));
    let registry = SensorRegistry::build(1, &factory).unwrap();

    let gauges = Arc::new(GaugeSet::new("aht20"));
    gauges.record(&SensorLabel::for_index(0), &Reading::new(19.5, 42.0));
    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let server = HttpServer::new(gauges.clone(), addr, "/metrics".to_string());
    let server_handle = tokio::spawn(server.serve(listener, shutdown_rx.clone()));

    let poller = SensorPoller::new(registry, gauges.clone(), Duration::from_millis(10));
    let poller_handle = tokio::spawn(poller.run(shutdown_rx));

    // Wait until the read is in progress
    tokio::task::spawn_blocking(move || started_rx.recv_timeout(Duration::from_secs(5)))
        .await
        .unwrap()
        .expect("sensor read never started");

    let client = reqwest::Client::new();
    let started = Instant::now();
    let response = tokio::time::timeout(
        Duration::from_millis(500),
        client.get(format!("http://{}/metrics", addr)).send(),
    )
    .await
    .expect("scrape blocked by the stalled read")
    .unwrap();
    assert!(response.status().is_success());
    let body = response.text().await.unwrap();
    assert!(started.elapsed() < Duration::from_millis(500));

    // Last known good value while the read is still stalled
    assert!(body.contains("aht20_temperature_celsius{sensor=\"sensor0\"} 19.5"));
    assert_eq!(gauges.stats().polls, 0);

    release_tx.send(()).unwrap();
    drop(release_tx);
    drop(client);

    shutdown_tx.send(true).unwrap();
    let _ = tokio::time::timeout(Duration::from_secs(2), poller_handle).await;
    let _ = tokio::time::timeout(Duration::from_secs(2), server_handle).await;
}
