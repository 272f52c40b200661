//! Guest - the exported surface of a sandboxed program
//!
//! The bridge drives a guest only through this trait. A runtime embedding
//! (a WASM VM, or a native mock in tests) maps it onto the module's
//! exports. Every entry point receives the `HostContext` so the guest can
//! call imports while it runs.
//!
//! Completion entry points default to no-ops: a guest that never requests
//! a capability does not have to know about it.

use crate::host::HostContext;
use crate::resolver::ResolverToken;

pub trait Guest {
    /// The guest's linear memory
    fn memory(&self) -> &[u8];
    fn memory_mut(&mut self) -> &mut [u8];

    fn event_buffer_ptr(&self) -> u32;
    fn diff_buffer_ptr(&self) -> u32;
    fn fetch_buffer_ptr(&self) -> u32;
    fn string_buffer_ptr(&self) -> u32;

    /// Allocate `len` bytes in guest memory. 0 means allocation failed.
    fn alloc(&mut self, len: u32) -> u32;

    /// Called once, after the registry is seeded
    fn init(&mut self, host: &mut HostContext);

    /// A new record is in the event buffer
    fn process_event(&mut self, host: &mut HostContext);

    /// `status` is 0 when the request failed; `(ptr, len)` is `(0, 0)`
    /// for an empty body
    fn on_fetch_complete(
        &mut self,
        host: &mut HostContext,
        token: ResolverToken,
        status: u32,
        ptr: u32,
        len: u32,
    ) {
        let _ = (host, token, status, ptr, len);
    }

    fn on_timer_complete(&mut self, host: &mut HostContext, token: ResolverToken) {
        let _ = (host, token);
    }

    fn on_kv_open_complete(&mut self, host: &mut HostContext, token: ResolverToken, ok: u32) {
        let _ = (host, token, ok);
    }

    /// put, put_blob and delete
    fn on_kv_complete(&mut self, host: &mut HostContext, token: ResolverToken, ok: u32) {
        let _ = (host, token, ok);
    }

    fn on_kv_get_complete(&mut self, host: &mut HostContext, token: ResolverToken, ptr: u32, len: u32) {
        let _ = (host, token, ptr, len);
    }

    fn on_clipboard_complete(&mut self, host: &mut HostContext, token: ResolverToken, ok: u32) {
        let _ = (host, token, ok);
    }

    fn on_file_open_complete(
        &mut self,
        host: &mut HostContext,
        token: ResolverToken,
        handle: u32,
        size: u32,
    ) {
        let _ = (host, token, handle, size);
    }

    fn on_decompress_complete(
        &mut self,
        host: &mut HostContext,
        token: ResolverToken,
        handle: u32,
        size: u32,
    ) {
        let _ = (host, token, handle, size);
    }

    fn on_permission_result(&mut self, host: &mut HostContext, token: ResolverToken, granted: u32) {
        let _ = (host, token, granted);
    }

    fn on_push_subscribe_complete(
        &mut self,
        host: &mut HostContext,
        token: ResolverToken,
        ptr: u32,
        len: u32,
    ) {
        let _ = (host, token, ptr, len);
    }

    fn on_push_subscription_result(
        &mut self,
        host: &mut HostContext,
        token: ResolverToken,
        ptr: u32,
        len: u32,
    ) {
        let _ = (host, token, ptr, len);
    }

    fn on_push_unsubscribe_complete(&mut self, host: &mut HostContext, token: ResolverToken, ok: u32) {
        let _ = (host, token, ok);
    }

    /// JSON array of strings at `(ptr, len)`
    fn on_pending_pushes_result(
        &mut self,
        host: &mut HostContext,
        token: ResolverToken,
        ptr: u32,
        len: u32,
    ) {
        let _ = (host, token, ptr, len);
    }

    fn on_pending_pushes_cleared(&mut self, host: &mut HostContext, token: ResolverToken, ok: u32) {
        let _ = (host, token, ok);
    }

    /// The push subscription was replaced by the host
    fn on_push_subscription_change(&mut self, host: &mut HostContext) {
        let _ = host;
    }
}
