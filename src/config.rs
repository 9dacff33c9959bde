use std::time::Duration;

/// Tunables for a worker and its connections.
///
/// One config is shared per worker; nothing here is mutated while
/// serving.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Size of a single socket read.
    pub read_buf_size: usize,
    /// Requests whose head exceeds this are rejected with 431.
    pub max_headers_size: usize,
    /// Requests whose body exceeds this are rejected with 413.
    pub max_body_size: usize,
    /// File streaming produces the next chunk only when the output
    /// buffer is below this.
    pub out_watermark: usize,
    /// Idle keep-alive connections are closed after this.
    pub keep_alive_timeout: Duration,
    /// Compressed file transfers are only attempted when the client
    /// weight for a supported coding exceeds this.
    pub compression_threshold: f32,
}

impl Default for ServerConfig {
    fn default() -> ServerConfig {
        ServerConfig {
            read_buf_size: 8192,
            max_headers_size: 16384,
            max_body_size: 104_856_700,
            out_watermark: 65536,
            keep_alive_timeout: Duration::from_secs(10),
            compression_threshold: 0.0,
        }
    }
}
