//! Counter example - a native guest driving the host tree through diffs

use std::sync::Arc;

use ward_bridge::diff::{DiffRecord, DIFF_HEADER_SIZE, DIFF_RECORD_SIZE, OP_SET_TEXT};
use ward_bridge::platform::FetchResponse;
use ward_bridge::{
    Bridge, BridgeConfig, Guest, HeadlessPlatform, HostContext, HostEvent, ResolverToken,
};
use ward_dom::outer_html;

const EVENT_PTR: u32 = 0x100;
const DIFF_PTR: u32 = 0x200;
const FETCH_PTR: u32 = 0x1200;
const STRING_PTR: u32 = 0x5200;
const HEAP_START: u32 = 0x6200;

struct Counter {
    memory: Vec<u8>,
    heap: u32,
    clicks: u32,
}

impl Counter {
    fn new() -> Self {
        Self {
            memory: vec![0; 64 * 1024],
            heap: HEAP_START,
            clicks: 0,
        }
    }

    fn render(&mut self, text: &str) {
        let start = FETCH_PTR as usize;
        self.memory[start..start + text.len()].copy_from_slice(text.as_bytes());

        let count = self.memory[DIFF_PTR as usize];
        let at = (DIFF_PTR + DIFF_HEADER_SIZE + count as u32 * DIFF_RECORD_SIZE) as usize;
        let record = DiffRecord::new(OP_SET_TEXT, 0, 0, text.len() as u32);
        self.memory[at..at + DIFF_RECORD_SIZE as usize].copy_from_slice(&record.to_bytes());
        self.memory[DIFF_PTR as usize] = count + 1;
    }
}

impl Guest for Counter {
    fn memory(&self) -> &[u8] {
        &self.memory
    }

    fn memory_mut(&mut self) -> &mut [u8] {
        &mut self.memory
    }

    fn event_buffer_ptr(&self) -> u32 {
        EVENT_PTR
    }

    fn diff_buffer_ptr(&self) -> u32 {
        DIFF_PTR
    }

    fn fetch_buffer_ptr(&self) -> u32 {
        FETCH_PTR
    }

    fn string_buffer_ptr(&self) -> u32 {
        STRING_PTR
    }

    fn alloc(&mut self, len: u32) -> u32 {
        if self.heap as usize + len as usize > self.memory.len() {
            return 0;
        }
        let ptr = self.heap;
        self.heap += len;
        ptr
    }

    fn init(&mut self, host: &mut HostContext) {
        host.log(1, "counter ready");
        host.fetch("/greeting", "GET", ResolverToken(1));
        self.render("clicks: 0");
    }

    fn process_event(&mut self, host: &mut HostContext) {
        // kind 1 is click
        if self.memory[EVENT_PTR as usize] == 1 {
            self.clicks += 1;
            host.log(0, &format!("click {}", self.clicks));
            self.render(&format!("clicks: {}", self.clicks));
        }
    }

    fn on_fetch_complete(
        &mut self,
        host: &mut HostContext,
        _token: ResolverToken,
        status: u32,
        ptr: u32,
        len: u32,
    ) {
        let body = &self.memory[ptr as usize..(ptr + len) as usize];
        let greeting = String::from_utf8_lossy(body).into_owned();
        host.log(1, &format!("greeting {} {:?}", status, greeting));
        self.render(&format!("{} (clicks: {})", greeting, self.clicks));
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt::init();

    let platform = Arc::new(HeadlessPlatform::new().with_route(
        "GET",
        "http://localhost/greeting",
        FetchResponse::new(200, &b"hello from the host"[..]),
    ));
    let mut bridge = Bridge::new(BridgeConfig::default(), Counter::new(), platform)?;

    let mut event_rx = bridge.subscribe();
    tokio::spawn(async move {
        while let Ok(event) = event_rx.recv().await {
            println!("📢 Event: {:?}", event);
        }
    });

    bridge.start()?;
    println!("✅ Bridge started");

    for _ in 0..3 {
        bridge.dispatch(&HostEvent::Click {
            target: None,
            x: 12,
            y: 34,
        });
    }

    let delivered = bridge.run_until_idle().await;
    println!("📬 Delivered {} completion(s)", delivered);

    let host = bridge.host();
    println!("📄 {}", outer_html(host.tree(), host.mount())?);

    bridge.stop();
    println!("🛑 Bridge stopped");
    Ok(())
}
