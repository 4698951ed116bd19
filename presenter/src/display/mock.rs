//! Recording display device for unit tests

use super::*;
use std::cell::RefCell;
use std::collections::{BTreeSet, HashMap};
use std::os::fd::AsRawFd;

#[derive(Debug, Default)]
pub(crate) struct MockState {
    pub prime: bool,
    pub mode: Option<Size>,
    pub blobs_by_prop: HashMap<(ModeObject, String), Vec<u8>>,

    pub next_id: u32,
    pub live_handles: BTreeSet<u32>,
    /// Most handles ever open at once
    pub peak_handles: usize,
    pub live_framebuffers: BTreeSet<u32>,
    pub live_blobs: BTreeSet<u32>,
    pub imported_fds: Vec<i32>,
    pub framebuffers: Vec<FramebufferLayout>,
    pub blobs_created: usize,
    pub blobs_destroyed: usize,
    pub commits: Vec<(PropertyRequest, bool)>,
    pub plane_updates: Vec<PlaneUpdate>,

    /// Fail the n-th import from now (0 = next one)
    pub fail_import_at: Option<usize>,
    pub fail_add_framebuffer: bool,
    pub fail_set_plane: bool,
    pub fail_commit: bool,
}

#[derive(Debug, Default)]
pub(crate) struct MockDevice {
    pub state: RefCell<MockState>,
}

impl MockDevice {
    pub fn new() -> Self {
        let device = Self::default();
        {
            let mut state = device.state.borrow_mut();
            state.prime = true;
            state.mode = Some(Size::new(1920, 1080));
            state.next_id = 100;
        }
        device
    }

    pub fn with_panel_blob(self, connector: u32, blob: Vec<u8>) -> Self {
        self.state
            .borrow_mut()
            .blobs_by_prop
            .insert((ModeObject::Connector(connector), props::HDR_PANEL_METADATA.into()), blob);
        self
    }

    pub fn live_handles(&self) -> usize {
        self.state.borrow().live_handles.len()
    }

    pub fn live_framebuffers(&self) -> usize {
        self.state.borrow().live_framebuffers.len()
    }

    pub fn live_blobs(&self) -> usize {
        self.state.borrow().live_blobs.len()
    }

    pub fn last_commit(&self) -> Option<PropertyRequest> {
        self.state.borrow().commits.last().map(|(r, _)| r.clone())
    }

    fn next_id(state: &mut MockState) -> u32 {
        state.next_id += 1;
        state.next_id
    }
}

fn not_found(what: &str, id: u32) -> io::Error {
    io::Error::new(io::ErrorKind::NotFound, format!("unknown {} {}", what, id))
}

impl DisplayDevice for MockDevice {
    fn supports_prime_import(&self) -> io::Result<bool> {
        Ok(self.state.borrow().prime)
    }

    fn crtc_mode_size(&self, _crtc: u32) -> io::Result<Option<Size>> {
        Ok(self.state.borrow().mode)
    }

    fn property_blob(&self, object: ModeObject, name: &str) -> io::Result<Option<Vec<u8>>> {
        Ok(self
            .state
            .borrow()
            .blobs_by_prop
            .get(&(object, name.to_string()))
            .cloned())
    }

    fn import_prime_fd(&self, fd: BorrowedFd<'_>) -> io::Result<GemHandle> {
        let mut state = self.state.borrow_mut();
        match state.fail_import_at {
            Some(0) => {
                state.fail_import_at = None;
                return Err(io::Error::other("import rejected"));
            }
            Some(n) => state.fail_import_at = Some(n - 1),
            None => {}
        }
        let id = Self::next_id(&mut state);
        state.live_handles.insert(id);
        state.peak_handles = state.peak_handles.max(state.live_handles.len());
        state.imported_fds.push(fd.as_raw_fd());
        Ok(GemHandle(id))
    }

    fn close_handle(&self, handle: GemHandle) -> io::Result<()> {
        if self.state.borrow_mut().live_handles.remove(&handle.0) {
            Ok(())
        } else {
            Err(not_found("handle", handle.0))
        }
    }

    fn add_framebuffer(&self, layout: &FramebufferLayout) -> io::Result<FramebufferId> {
        let mut state = self.state.borrow_mut();
        if state.fail_add_framebuffer {
            return Err(io::Error::other("framebuffer rejected"));
        }
        let id = Self::next_id(&mut state);
        state.live_framebuffers.insert(id);
        state.framebuffers.push(layout.clone());
        Ok(FramebufferId(id))
    }

    fn destroy_framebuffer(&self, fb: FramebufferId) -> io::Result<()> {
        if self.state.borrow_mut().live_framebuffers.remove(&fb.0) {
            Ok(())
        } else {
            Err(not_found("framebuffer", fb.0))
        }
    }

    fn create_blob(&self, _data: &[u8]) -> io::Result<BlobId> {
        let mut state = self.state.borrow_mut();
        let id = Self::next_id(&mut state);
        state.live_blobs.insert(id);
        state.blobs_created += 1;
        Ok(BlobId(id))
    }

    fn destroy_blob(&self, blob: BlobId) -> io::Result<()> {
        let mut state = self.state.borrow_mut();
        if state.live_blobs.remove(&blob.0) {
            state.blobs_destroyed += 1;
            Ok(())
        } else {
            Err(not_found("blob", blob.0))
        }
    }

    fn set_plane(&self, update: &PlaneUpdate) -> io::Result<()> {
        let mut state = self.state.borrow_mut();
        if state.fail_set_plane && update.framebuffer.is_some() {
            return Err(io::Error::other("set_plane rejected"));
        }
        state.plane_updates.push(*update);
        Ok(())
    }

    fn commit(&self, request: &PropertyRequest, nonblock: bool) -> io::Result<()> {
        let mut state = self.state.borrow_mut();
        if state.fail_commit {
            return Err(io::Error::other("commit rejected"));
        }
        state.commits.push((request.clone(), nonblock));
        Ok(())
    }
}
