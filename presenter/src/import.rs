//! DMA-buf import into display-native handles

use crate::display::{DisplayDevice, GemHandle};
use crate::log_and_continue;
use common::{DrmPlane, FrameDescriptor, MAX_PLANES, PresentError, Result};

/// GEM handles imported for one frame, indexed by descriptor object.
///
/// Each handle is closed exactly once by [`ImportedHandles::release`]; the
/// slot is emptied on the first attempt whether or not the close succeeds.
#[derive(Debug, Default)]
pub struct ImportedHandles {
    handles: [Option<GemHandle>; MAX_PLANES],
}

impl ImportedHandles {
    /// Import every distinct object referenced by `planes`.
    ///
    /// On failure the handles imported so far are closed again and the error
    /// is reported as [`PresentError::Import`].
    pub fn import<D: DisplayDevice + ?Sized>(
        device: &D,
        descriptor: &FrameDescriptor,
        planes: &[DrmPlane],
    ) -> Result<Self> {
        let mut imported = Self::default();

        for plane in planes {
            let index = plane.object_index;
            if imported.get(index).is_some() {
                continue;
            }

            let object = match descriptor.object(index) {
                Some(object) if index < MAX_PLANES => object,
                _ => {
                    imported.rollback(device);
                    return Err(PresentError::InvalidFrame(format!(
                        "plane references missing object {}",
                        index
                    )));
                }
            };

            match device.import_prime_fd(object.fd()) {
                Ok(handle) => {
                    log::trace!("Imported object {} as GEM handle {}", index, handle.0);
                    imported.handles[index] = Some(handle);
                }
                Err(e) => {
                    imported.rollback(device);
                    return Err(PresentError::Import(format!(
                        "prime fd of object {}: {}",
                        index, e
                    )));
                }
            }
        }

        Ok(imported)
    }

    /// Handle for a descriptor object, if it was imported
    pub fn get(&self, object_index: usize) -> Option<GemHandle> {
        self.handles.get(object_index).copied().flatten()
    }

    /// Number of live handles
    pub fn len(&self) -> usize {
        self.handles.iter().flatten().count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Close every handle, returning the first failure
    pub fn release<D: DisplayDevice + ?Sized>(&mut self, device: &D) -> Result<()> {
        let mut result = Ok(());
        for (index, slot) in self.handles.iter_mut().enumerate() {
            let Some(handle) = slot.take() else {
                continue;
            };
            if let Err(e) = device.close_handle(handle) {
                log::warn!("Failed to close GEM handle {}: {}", handle.0, e);
                if result.is_ok() {
                    result = Err(PresentError::Teardown(format!(
                        "close handle of object {}: {}",
                        index, e
                    )));
                }
            }
        }
        result
    }

    fn rollback<D: DisplayDevice + ?Sized>(&mut self, device: &D) {
        log_and_continue!(self.release(device), "roll back partial import");
    }
}

impl Drop for ImportedHandles {
    fn drop(&mut self) {
        if !self.is_empty() {
            log::error!("Leaking {} GEM handles that were never released", self.len());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::display::mock::MockDevice;
    use common::{DrmLayer, DrmObject, fourcc};
    use std::os::fd::OwnedFd;

    fn descriptor(objects: usize, planes: &[usize]) -> FrameDescriptor {
        let objects = (0..objects)
            .map(|_| DrmObject::new(OwnedFd::from(tempfile::tempfile().unwrap()), 4096))
            .collect();
        let planes = planes
            .iter()
            .map(|&object_index| DrmPlane {
                object_index,
                offset: 0,
                pitch: 64,
            })
            .collect();
        FrameDescriptor::new(objects, vec![DrmLayer::new(fourcc::NV12, planes)]).unwrap()
    }

    #[test]
    fn test_one_handle_per_object() {
        let device = MockDevice::new();
        let desc = descriptor(1, &[0, 0]);

        let mut handles = ImportedHandles::import(&device, &desc, &desc.scanout_planes()).unwrap();
        assert_eq!(handles.len(), 1);
        assert_eq!(device.live_handles(), 1);

        handles.release(&device).unwrap();
        assert!(handles.is_empty());
        assert_eq!(device.live_handles(), 0);
    }

    #[test]
    fn test_partial_import_rolls_back() {
        let device = MockDevice::new();
        device.state.borrow_mut().fail_import_at = Some(1);
        let desc = descriptor(2, &[0, 1]);

        let err = ImportedHandles::import(&device, &desc, &desc.scanout_planes()).unwrap_err();
        assert!(matches!(err, PresentError::Import(_)));
        assert_eq!(device.live_handles(), 0);
    }

    #[test]
    fn test_release_is_idempotent() {
        let device = MockDevice::new();
        let desc = descriptor(2, &[0, 1]);
        let mut handles = ImportedHandles::import(&device, &desc, &desc.scanout_planes()).unwrap();

        handles.release(&device).unwrap();
        // Second release has nothing left to close
        handles.release(&device).unwrap();
        assert_eq!(device.live_handles(), 0);
    }

    #[test]
    fn test_failed_close_still_empties_slot() {
        let device = MockDevice::new();
        let desc = descriptor(1, &[0]);
        let mut handles = ImportedHandles::import(&device, &desc, &desc.scanout_planes()).unwrap();

        device.state.borrow_mut().live_handles.clear();
        let err = handles.release(&device).unwrap_err();
        assert!(matches!(err, PresentError::Teardown(_)));
        assert!(handles.is_empty());
    }
}
