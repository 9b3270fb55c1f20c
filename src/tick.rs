// src/tick.rs - Background loop advancing time-dependent state
use std::time::Duration;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};

use crate::model::SharedModel;

/// Perturb sensors and integrate motors every `period` until shutdown.
pub fn spawn_tick_loop(
    model: SharedModel,
    period: Duration,
    mut shutdown_rx: broadcast::Receiver<()>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(period);
        interval.set_missed_tick_behavior(MissedTickBehavior::Skip);
        let mut last = Instant::now();
        loop {
            tokio::select! {
                _ = shutdown_rx.recv() => {
                    tracing::debug!("Tick loop shutting down");
                    break;
                }
                _ = interval.tick() => {
                    let now = Instant::now();
                    let dt = now.duration_since(last).as_secs_f64();
                    last = now;
                    model.lock().await.tick(dt);
                }
            }
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;
    use crate::model::SystemModel;
    use std::sync::Arc;
    use tokio::sync::Mutex;

    #[tokio::test]
    async fn test_tick_loop_moves_motor_and_stops() {
        let model = Arc::new(Mutex::new(SystemModel::new("tick", &Config::default())));
        {
            let mut guard = model.lock().await;
            guard.create_motor("m").unwrap();
            guard.set_motor_speed("m", 100.0).unwrap();
        }
        let (shutdown_tx, shutdown_rx) = broadcast::channel(1);
        let handle = spawn_tick_loop(model.clone(), Duration::from_millis(10), shutdown_rx);
        tokio::time::sleep(Duration::from_millis(80)).await;
        shutdown_tx.send(()).unwrap();
        handle.await.unwrap();
        assert!(model.lock().await.motor("m").unwrap().position > 0.0);
    }
}
