use std::sync::{Arc, Mutex, PoisonError};

use crate::notify::{PendingSlot, Wakeup};
use crate::screen::geometry::{GeometryError, ScreenGeometry};
use crate::screen::info::VarScreenInfo;

/// Producer side of the pan notification channel.
///
/// Holds the device's current geometry.  Every accepted pan publishes a
/// snapshot of the new variable info into the shared slot and then fires the
/// optional [`Wakeup`] so a readiness-based consumer sees the change.
pub struct PanDisplay {
    geometry: Mutex<ScreenGeometry>,
    slot: Arc<PendingSlot<VarScreenInfo>>,
    wakeup: Option<Arc<dyn Wakeup>>,
}

impl PanDisplay {
    pub fn new(geometry: ScreenGeometry, slot: Arc<PendingSlot<VarScreenInfo>>) -> Self {
        Self {
            geometry: Mutex::new(geometry),
            slot,
            wakeup: None,
        }
    }

    pub fn with_wakeup(mut self, wakeup: Arc<dyn Wakeup>) -> Self {
        self.wakeup = Some(wakeup);
        self
    }

    /// Moves the visible window and notifies the consumer.
    ///
    /// # Errors
    ///
    /// [`GeometryError::PanOutOfRange`] if the window would leave the virtual
    /// buffer.  Nothing is published and the geometry is unchanged.
    pub fn pan(&self, xoffset: u32, yoffset: u32) -> Result<VarScreenInfo, GeometryError> {
        let snapshot = {
            let mut geometry = self.geometry.lock().unwrap_or_else(PoisonError::into_inner);
            geometry.pan(xoffset, yoffset)?;
            let snapshot = geometry.to_var();
            // Stored under the geometry lock so concurrent pans reach the
            // slot in the order they were applied.
            self.slot.store(snapshot);
            snapshot
        };
        self.slot.notify();
        tracing::trace!(xoffset, yoffset, "display panned");
        if let Some(wakeup) = &self.wakeup {
            wakeup.wake();
        }
        Ok(snapshot)
    }

    /// Pans to the offsets carried by a variable-info request.
    ///
    /// # Errors
    ///
    /// See [`PanDisplay::pan`].
    pub fn pan_var(&self, var: &VarScreenInfo) -> Result<VarScreenInfo, GeometryError> {
        self.pan(var.xoffset, var.yoffset)
    }

    /// Copy of the current geometry.
    pub fn geometry(&self) -> ScreenGeometry {
        self.geometry
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::screen::geometry::DisplayMode;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::OnceLock;
    use std::thread;
    use std::time::Duration;

    #[derive(Default)]
    struct CountingWakeup {
        wakes: AtomicUsize,
    }

    impl Wakeup for CountingWakeup {
        fn wake(&self) {
            self.wakes.fetch_add(1, Ordering::SeqCst);
        }
    }

    fn double_buffered() -> ScreenGeometry {
        ScreenGeometry::new(
            "fb",
            &DisplayMode {
                xres: 480,
                yres: 800,
                xres_virtual: 480,
                yres_virtual: 1600,
                bits_per_pixel: 32,
            },
        )
        .expect("valid geometry")
    }

    #[test]
    fn test_accepted_pan_publishes_snapshot_and_wakes() {
        // Arrange
        let slot = Arc::new(PendingSlot::new());
        let wakeup = Arc::new(CountingWakeup::default());
        let pan = PanDisplay::new(double_buffered(), Arc::clone(&slot))
            .with_wakeup(wakeup.clone());

        // Act
        pan.pan(0, 800).expect("fits");

        // Assert
        let snapshot = slot.take().expect("pending");
        assert_eq!(snapshot.yoffset, 800);
        assert_eq!(wakeup.wakes.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_rejected_pan_publishes_nothing() {
        // Arrange
        let slot = Arc::new(PendingSlot::new());
        let wakeup = Arc::new(CountingWakeup::default());
        let pan = PanDisplay::new(double_buffered(), Arc::clone(&slot))
            .with_wakeup(wakeup.clone());

        // Act
        let result = pan.pan(0, 801);

        // Assert
        assert!(result.is_err());
        assert!(!slot.is_pending());
        assert_eq!(pan.geometry().yoffset(), 0);
        assert_eq!(wakeup.wakes.load(Ordering::SeqCst), 0);
    }

    /// Reads the producer's geometry from inside the wake-up.
    #[derive(Default)]
    struct InspectingWakeup {
        pan: OnceLock<Arc<PanDisplay>>,
        seen: Mutex<Vec<u32>>,
    }

    impl Wakeup for InspectingWakeup {
        fn wake(&self) {
            if let Some(pan) = self.pan.get() {
                let yoffset = pan.geometry().yoffset();
                self.seen.lock().expect("lock poisoned").push(yoffset);
            }
        }
    }

    #[test]
    fn test_wakeup_runs_after_geometry_lock_is_released() {
        // Arrange
        let slot = Arc::new(PendingSlot::new());
        let wakeup = Arc::new(InspectingWakeup::default());
        let pan = Arc::new(
            PanDisplay::new(double_buffered(), Arc::clone(&slot)).with_wakeup(wakeup.clone()),
        );
        assert!(wakeup.pan.set(Arc::clone(&pan)).is_ok());

        // Act
        pan.pan(0, 800).expect("fits");

        // Assert
        assert_eq!(*wakeup.seen.lock().expect("lock poisoned"), vec![800]);
    }

    #[test]
    fn test_blocked_reader_can_query_geometry_when_woken() {
        // Arrange
        let slot = Arc::new(PendingSlot::new());
        let pan = Arc::new(PanDisplay::new(double_buffered(), Arc::clone(&slot)));
        let reader_pan = Arc::clone(&pan);
        let reader_slot = Arc::clone(&slot);

        // Act
        let reader = thread::spawn(move || {
            let snapshot = reader_slot.wait_take(Duration::from_secs(5));
            (snapshot, reader_pan.geometry().yoffset())
        });
        thread::sleep(Duration::from_millis(10));
        pan.pan(0, 800).expect("fits");
        let (snapshot, yoffset) = reader.join().expect("reader thread");

        // Assert
        assert_eq!(snapshot.expect("open slot").map(|v| v.yoffset), Some(800));
        assert_eq!(yoffset, 800);
    }
}
