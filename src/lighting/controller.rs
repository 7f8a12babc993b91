//! Multi-zone lighting controller: duty-cycle safety cap, flash vs.
//! constant capture modes, and redundant-write suppression.

use crate::error::{AppResult, ScanError};
use crate::events::{EventBus, EventData};
use crate::lighting::device::PwmZone;
use crate::lighting::types::{FlashMode, LedZoneConfig, DUTY_CYCLE_CAP, REDUNDANT_WRITE_THRESHOLD};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex as AsyncMutex;
use tracing::instrument;

struct ZoneEntry {
    device: Arc<dyn PwmZone>,
    config: LedZoneConfig,
}

pub struct LightingController {
    zones: Vec<ZoneEntry>,
    events: Option<Arc<EventBus>>,
    /// Serialises every zone write through one guard: no two writes to
    /// PWM hardware can overlap, whichever zone they target, and the
    /// redundant-write suppression check below happens inside the same
    /// held lock so it can't race a concurrent write to the same zone.
    /// A `tokio::sync::Mutex` rather than a sync one, since the guard is
    /// held across the device's `await`ed write.
    last_commanded: AsyncMutex<HashMap<String, f64>>,
}

impl LightingController {
    pub fn new(zones: Vec<(Arc<dyn PwmZone>, LedZoneConfig)>) -> Self {
        Self {
            zones: zones.into_iter().map(|(device, config)| ZoneEntry { device, config }).collect(),
            events: None,
            last_commanded: AsyncMutex::new(HashMap::new()),
        }
    }

    pub fn with_events(mut self, events: Arc<EventBus>) -> Self {
        self.events = Some(events);
        self
    }

    fn entry(&self, zone_id: &str) -> AppResult<&ZoneEntry> {
        self.zones
            .iter()
            .find(|z| z.config.id == zone_id)
            .ok_or_else(|| ScanError::Configuration(format!("unknown LED zone '{zone_id}'")))
    }

    /// Sets a zone's brightness, enforcing the hard safety cap and
    /// suppressing writes that don't meaningfully change duty cycle. The
    /// cap is always a refusal, never a clamp: rejected if
    /// `duty > zone.max_duty_cycle`, and `zone.max_duty_cycle` itself can
    /// never exceed `DUTY_CYCLE_CAP` (enforced again here regardless of
    /// what [`crate::validation`] already checked at startup: a
    /// non-bypassable check at the component boundary).
    #[instrument(skip(self))]
    pub async fn set_brightness(&self, zone_id: &str, duty: f64) -> AppResult<()> {
        let entry = self.entry(zone_id)?;
        let cap = entry.config.max_duty_cycle.min(DUTY_CYCLE_CAP);
        if duty > cap {
            if let Some(bus) = &self.events {
                bus.publish(
                    EventData::LedSafetyRefused {
                        zone: zone_id.to_string(),
                        requested: duty,
                    },
                    "lighting",
                );
            }
            return Err(ScanError::LedSafety {
                zone: zone_id.to_string(),
                requested: duty,
                cap,
            });
        }
        if duty < 0.0 {
            return Err(ScanError::Configuration(format!("zone '{zone_id}': negative duty cycle {duty}")));
        }

        let mut last = self.last_commanded.lock().await;
        if let Some(&prev) = last.get(zone_id) {
            // "On" is defined the same way the threshold itself is: a zone
            // crossing the 1% boundary always writes, even if both values
            // happen to round to the same is-it-off bucket under a looser
            // definition (on iff duty > 0.01).
            let crosses_boundary = (prev > REDUNDANT_WRITE_THRESHOLD) != (duty > REDUNDANT_WRITE_THRESHOLD);
            if !crosses_boundary && (prev - duty).abs() < REDUNDANT_WRITE_THRESHOLD {
                return Ok(());
            }
        }
        entry.device.write_duty_cycle(duty).await?;
        last.insert(zone_id.to_string(), duty);
        Ok(())
    }

    /// Raises a zone to capture brightness, holds it `flash_duration_ms`,
    /// then drops back to idle brightness — the `Flash` mode's capture
    /// bracket. `Constant` zones are left alone; the caller is
    /// expected to have raised them once at scan start.
    #[instrument(skip(self))]
    pub async fn flash(&self, zone_id: &str) -> AppResult<()> {
        let entry = self.entry(zone_id)?;
        if entry.config.flash_mode != FlashMode::Flash {
            return Ok(());
        }
        let capture = entry.config.capture_brightness;
        let idle = entry.config.idle_brightness;
        let hold = Duration::from_millis(entry.config.flash_duration_ms);

        self.set_brightness(zone_id, capture).await?;
        tokio::time::sleep(hold).await;
        self.set_brightness(zone_id, idle).await?;
        Ok(())
    }

    /// Prepares every zone once at scan start, per its mode: `Constant`
    /// zones are raised to capture brightness for the whole scan;
    /// `Flash` zones are raised to idle brightness so the "idle between
    /// points" baseline is established even before the first point's
    /// capture window. Together with `turn_off_all` at scan end, this is
    /// what keeps total LED writes at the spec's §4.7 invariant: exactly 2
    /// per scan in `Constant` mode (on here, off at scan end), and
    /// `2·(points + 1)` in `Flash` mode (one bracketing write here, one
    /// enter/exit pair per point, one final off).
    pub async fn prepare_scan(&self) -> AppResult<()> {
        for zone in &self.zones {
            let target = match zone.config.flash_mode {
                FlashMode::Constant => zone.config.capture_brightness,
                FlashMode::Flash => zone.config.idle_brightness,
            };
            self.set_brightness(&zone.config.id, target).await?;
        }
        Ok(())
    }

    /// Raises every `Flash`-mode zone to capture brightness for the
    /// duration of a point's capture window. `Constant`
    /// zones are untouched — they were already raised at scan start.
    #[instrument(skip(self))]
    pub async fn enter_capture_window(&self) -> AppResult<()> {
        for zone in &self.zones {
            if zone.config.flash_mode == FlashMode::Flash {
                self.set_brightness(&zone.config.id, zone.config.capture_brightness).await?;
            }
        }
        Ok(())
    }

    /// Lowers every `Flash`-mode zone back to idle brightness at the end of
    /// a point's capture window.
    #[instrument(skip(self))]
    pub async fn exit_capture_window(&self) -> AppResult<()> {
        for zone in &self.zones {
            if zone.config.flash_mode == FlashMode::Flash {
                self.set_brightness(&zone.config.id, zone.config.idle_brightness).await?;
            }
        }
        Ok(())
    }

    pub async fn turn_off_all(&self) -> AppResult<()> {
        for zone in &self.zones {
            self.set_brightness(&zone.config.id, 0.0).await?;
        }
        Ok(())
    }

    /// Unconditional all-zones-off, bypassing redundant-write suppression
    /// and the cached-state check — used on the emergency-stop path where
    /// the in-memory cache may not reflect reality.
    pub async fn emergency_shutdown(&self) -> AppResult<()> {
        let mut last = self.last_commanded.lock().await;
        for zone in &self.zones {
            zone.device.write_duty_cycle(0.0).await?;
            last.insert(zone.config.id.clone(), 0.0);
        }
        Ok(())
    }

    pub fn zone_ids(&self) -> Vec<String> {
        self.zones.iter().map(|z| z.config.id.clone()).collect()
    }

    /// The last duty cycle successfully committed to a zone's hardware, or
    /// `None` if it has never been written.
    pub async fn current_duty(&self, zone_id: &str) -> Option<f64> {
        self.last_commanded.lock().await.get(zone_id).copied()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::lighting::mock::MockPwmZone;

    fn zone(id: &str, mode: FlashMode) -> (Arc<dyn PwmZone>, LedZoneConfig) {
        zone_with_cap(id, mode, DUTY_CYCLE_CAP)
    }

    fn zone_with_cap(id: &str, mode: FlashMode, max_duty_cycle: f64) -> (Arc<dyn PwmZone>, LedZoneConfig) {
        (
            Arc::new(MockPwmZone::new(id)),
            LedZoneConfig {
                id: id.to_string(),
                pwm_channel: 0,
                max_duty_cycle,
                idle_brightness: 0.1,
                capture_brightness: 0.8,
                flash_mode: mode,
                flash_duration_ms: 50,
            },
        )
    }

    #[tokio::test]
    async fn rejects_duty_above_cap() {
        let controller = LightingController::new(vec![zone("z1", FlashMode::Flash)]);
        let err = controller.set_brightness("z1", 0.95).await.unwrap_err();
        assert!(matches!(err, ScanError::LedSafety { .. }));
    }

    #[tokio::test]
    async fn accepts_duty_at_cap_boundary() {
        let controller = LightingController::new(vec![zone("z1", FlashMode::Flash)]);
        assert!(controller.set_brightness("z1", DUTY_CYCLE_CAP).await.is_ok());
    }

    #[tokio::test]
    async fn rejects_duty_above_stricter_per_zone_cap() {
        // This zone's own max_duty_cycle (0.5) is stricter than the global
        // 0.90 ceiling; 0.8 is within the global cap but not this zone's.
        let controller = LightingController::new(vec![zone_with_cap("z1", FlashMode::Flash, 0.5)]);
        let err = controller.set_brightness("z1", 0.8).await.unwrap_err();
        assert!(matches!(err, ScanError::LedSafety { cap, .. } if (cap - 0.5).abs() < 1e-9));
    }

    #[tokio::test]
    async fn per_zone_cap_can_never_exceed_global_cap() {
        // Even a (misconfigured) zone claiming a 0.99 ceiling is still
        // bounded by the global 0.90 hard cap at the component boundary.
        let controller = LightingController::new(vec![zone_with_cap("z1", FlashMode::Flash, 0.99)]);
        let err = controller.set_brightness("z1", 0.95).await.unwrap_err();
        assert!(matches!(err, ScanError::LedSafety { cap, .. } if (cap - DUTY_CYCLE_CAP).abs() < 1e-9));
    }

    #[tokio::test]
    async fn flash_raises_then_restores_idle() {
        let controller = LightingController::new(vec![zone("z1", FlashMode::Flash)]);
        controller.flash("z1").await.unwrap();
        // after flash returns, the zone should be back at idle brightness
        assert_eq!(controller.current_duty("z1").await, Some(0.1));
    }

    #[tokio::test]
    async fn redundant_write_is_suppressed() {
        let controller = LightingController::new(vec![zone("z1", FlashMode::Flash)]);
        controller.set_brightness("z1", 0.3).await.unwrap();
        // Below the 1% threshold and not an on/off boundary crossing: the
        // second write must be suppressed, not just idempotent.
        controller.set_brightness("z1", 0.305).await.unwrap();
        assert_eq!(controller.current_duty("z1").await, Some(0.3));
    }

    #[tokio::test]
    async fn on_off_boundary_crossing_always_writes() {
        let controller = LightingController::new(vec![zone("z1", FlashMode::Flash)]);
        controller.set_brightness("z1", 0.005).await.unwrap();
        controller.set_brightness("z1", 0.0).await.unwrap();
        assert_eq!(controller.current_duty("z1").await, Some(0.0));
    }

    #[tokio::test]
    async fn refused_write_does_not_change_current_duty() {
        let controller = LightingController::new(vec![zone("z1", FlashMode::Flash)]);
        controller.set_brightness("z1", 0.5).await.unwrap();
        assert!(controller.set_brightness("z1", 0.95).await.is_err());
        assert_eq!(controller.current_duty("z1").await, Some(0.5));
    }

    #[tokio::test]
    async fn flash_mode_scan_shaped_sequence_totals_2_times_points_plus_1_writes() {
        // Mirrors spec.md §8 scenario 1's flash-mode LED transition count:
        // 2 * (points + 1) total writes across a whole scan.
        let mock = Arc::new(MockPwmZone::new("z1"));
        let mock_dyn: Arc<dyn PwmZone> = mock.clone();
        let config = LedZoneConfig {
            id: "z1".into(),
            pwm_channel: 0,
            max_duty_cycle: DUTY_CYCLE_CAP,
            idle_brightness: 0.05,
            capture_brightness: 0.30,
            flash_mode: FlashMode::Flash,
            flash_duration_ms: 50,
        };
        let controller = LightingController::new(vec![(mock_dyn, config)]);

        let points = 8u64;
        controller.prepare_scan().await.unwrap();
        for _ in 0..points {
            controller.enter_capture_window().await.unwrap();
            controller.exit_capture_window().await.unwrap();
        }
        controller.turn_off_all().await.unwrap();

        assert_eq!(mock.write_count(), 2 * (points + 1));
    }

    #[tokio::test]
    async fn constant_mode_scan_shaped_sequence_totals_2_writes() {
        let mock = Arc::new(MockPwmZone::new("z1"));
        let mock_dyn: Arc<dyn PwmZone> = mock.clone();
        let config = LedZoneConfig {
            id: "z1".into(),
            pwm_channel: 0,
            max_duty_cycle: DUTY_CYCLE_CAP,
            idle_brightness: 0.05,
            capture_brightness: 0.30,
            flash_mode: FlashMode::Constant,
            flash_duration_ms: 50,
        };
        let controller = LightingController::new(vec![(mock_dyn, config)]);

        controller.prepare_scan().await.unwrap();
        // Constant zones are untouched between points: the capture/exit
        // window calls below should be no-ops for this zone.
        for _ in 0..8 {
            controller.enter_capture_window().await.unwrap();
            controller.exit_capture_window().await.unwrap();
        }
        controller.turn_off_all().await.unwrap();

        assert_eq!(mock.write_count(), 2);
    }
}
