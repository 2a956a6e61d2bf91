// src/channels/buzzer.rs

use super::NotificationChannel;
use crate::config::BuzzerConfig;
use crate::types::AlertEpisode;
use anyhow::{Context, Result};
use async_trait::async_trait;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, info, warn};

/// A binary output line.
pub trait OutputPin: Send + Sync + 'static {
    fn set(&self, high: bool) -> Result<()>;
}

/// Open the configured pin through the backend this build uses.
pub fn open_pin(config: &BuzzerConfig) -> Result<Arc<dyn OutputPin>> {
    #[cfg(feature = "rpi")]
    {
        Ok(Arc::new(rpi::RppalPin::open(config.pin)?))
    }

    #[cfg(not(feature = "rpi"))]
    {
        Ok(Arc::new(SysfsPin::open(&config.sysfs_root, config.pin)?))
    }
}

/// Pin driven through the legacy `/sys/class/gpio` interface.
pub struct SysfsPin {
    value_path: PathBuf,
}

impl SysfsPin {
    pub fn open(root: impl AsRef<Path>, pin: u8) -> Result<Self> {
        let root = root.as_ref();
        let pin_dir = root.join(format!("gpio{}", pin));

        if !pin_dir.exists() {
            std::fs::write(root.join("export"), pin.to_string())
                .with_context(|| format!("failed to export GPIO {} under {}", pin, root.display()))?;
        }

        std::fs::write(pin_dir.join("direction"), "out")
            .with_context(|| format!("failed to set GPIO {} as output", pin))?;

        let pin = Self {
            value_path: pin_dir.join("value"),
        };
        pin.set(false)?;
        Ok(pin)
    }
}

impl OutputPin for SysfsPin {
    fn set(&self, high: bool) -> Result<()> {
        std::fs::write(&self.value_path, if high { "1" } else { "0" })
            .with_context(|| format!("failed to write {}", self.value_path.display()))
    }
}

#[cfg(feature = "rpi")]
mod rpi {
    use super::OutputPin;
    use anyhow::{Context, Result};
    use std::sync::Mutex;

    pub struct RppalPin {
        pin: Mutex<rppal::gpio::OutputPin>,
    }

    impl RppalPin {
        pub fn open(pin: u8) -> Result<Self> {
            let gpio = rppal::gpio::Gpio::new().context("GPIO unavailable")?;
            let mut pin = gpio
                .get(pin)
                .with_context(|| format!("GPIO {} unavailable", pin))?
                .into_output();
            pin.set_low();
            Ok(Self {
                pin: Mutex::new(pin),
            })
        }
    }

    impl OutputPin for RppalPin {
        fn set(&self, high: bool) -> Result<()> {
            let mut pin = self
                .pin
                .lock()
                .map_err(|_| anyhow::anyhow!("GPIO lock poisoned"))?;
            if high {
                pin.set_high();
            } else {
                pin.set_low();
            }
            Ok(())
        }
    }
}

/// Sounds a buzzer for a fixed time. Overlapping deliveries share one
/// deadline, so the buzzer stays on until the latest pulse ends.
pub struct BuzzerChannel {
    pin: Arc<dyn OutputPin>,
    pulse: Duration,
    deadline: Arc<Mutex<Option<Instant>>>,
}

impl BuzzerChannel {
    pub fn new(pin: Arc<dyn OutputPin>, pulse: Duration) -> Self {
        Self {
            pin,
            pulse,
            deadline: Arc::new(Mutex::new(None)),
        }
    }

    /// Push the shared deadline out to `until` if it is later.
    fn extend(&self, until: Instant) {
        let mut deadline = self.deadline.lock().unwrap_or_else(PoisonError::into_inner);
        if deadline.map_or(true, |d| d < until) {
            *deadline = Some(until);
        }
    }
}

/// True if no later pulse has taken over the pin since `until` was set.
/// Clears the deadline when it returns true.
fn release(deadline: &Mutex<Option<Instant>>, until: Instant) -> bool {
    let mut deadline = deadline.lock().unwrap_or_else(PoisonError::into_inner);
    let current = *deadline;
    match current {
        Some(d) if d > until => false,
        _ => {
            *deadline = None;
            true
        }
    }
}

async fn set_level(pin: &Arc<dyn OutputPin>, high: bool) -> Result<()> {
    let pin = pin.clone();
    tokio::task::spawn_blocking(move || pin.set(high))
        .await
        .context("GPIO write task failed")?
}

/// Pulls the pin low when dropped, so a cancelled pulse never leaves the
/// buzzer sounding.
struct LowOnDrop {
    pin: Arc<dyn OutputPin>,
    deadline: Arc<Mutex<Option<Instant>>>,
    until: Instant,
    armed: bool,
}

impl LowOnDrop {
    fn disarm(mut self) {
        self.armed = false;
    }
}

impl Drop for LowOnDrop {
    fn drop(&mut self) {
        if !self.armed || !release(&self.deadline, self.until) {
            return;
        }
        if let Err(e) = self.pin.set(false) {
            warn!("Failed to silence buzzer: {:#}", e);
        }
    }
}

#[async_trait]
impl NotificationChannel for BuzzerChannel {
    fn name(&self) -> &'static str {
        "buzzer"
    }

    async fn deliver(&self, episode: &AlertEpisode) -> Result<()> {
        info!(
            "🔊 Sounding buzzer for {:.1}s ({})",
            self.pulse.as_secs_f64(),
            episode.label()
        );

        let until = Instant::now() + self.pulse;
        self.extend(until);
        let guard = LowOnDrop {
            pin: self.pin.clone(),
            deadline: self.deadline.clone(),
            until,
            armed: true,
        };

        set_level(&self.pin, true)
            .await
            .context("could not sound buzzer")?;
        tokio::time::sleep_until(until).await;

        guard.disarm();
        if !release(&self.deadline, until) {
            debug!("Buzzer pulse for {} extended by a later episode", episode.label());
            return Ok(());
        }

        // Report a failure to switch off instead of only logging it
        set_level(&self.pin, false)
            .await
            .context("could not silence buzzer")
    }
}
