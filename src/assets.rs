use std::time::Duration;

// display geometry of the reference SSD1306-class panel
pub const OUT_WIDTH: u32 = 128;
pub const OUT_HEIGHT: u32 = 64;
pub const FRAME_BYTES: usize = (OUT_WIDTH * OUT_HEIGHT / 8) as usize;
pub const AUDIO_BYTES: usize = 1;

// channel capacities, counted in units of the channel item type
pub const VIDEO_CHANNEL_CAPACITY: usize = 1024 * 1024 * 100;
pub const AUDIO_CHANNEL_CAPACITY: usize = 1024 * 10;
pub const BITMAP_CHANNEL_CAPACITY: usize = 1024 * 100;
pub const TONE_CHANNEL_CAPACITY: usize = 1024 * 10;

// poll intervals of the wait loops
pub const INPUT_POLL: Duration = Duration::from_millis(1);
pub const VIDEO_OUTPUT_POLL: Duration = Duration::from_micros(1);
pub const AUDIO_OUTPUT_POLL: Duration = Duration::from_millis(1);
pub const TRANSFER_POLL: Duration = Duration::from_micros(100);

// consecutive sink write failures tolerated before the run is failed
pub const MAX_SINK_FAILURES: u32 = 10;

// bits on the wire per byte with 8N1 framing
pub const LINE_BITS_PER_BYTE: u32 = 10;

pub const HEALTH_INTERVAL: Duration = Duration::from_secs(5);
pub const STALL_THRESHOLD: Duration = Duration::from_secs(5);

// frames inspected when the container does not report a frame rate
pub const FRAMERATE_PROBE_FRAMES: usize = 16;
