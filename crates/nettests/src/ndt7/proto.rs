//! ndt7 protocol constants.

use std::time::Duration;

/// Value of the `Sec-WebSocket-Protocol` header.
pub const SEC_WEBSOCKET_PROTOCOL: &str = "net.measurementlab.ndt.v7";

/// Maximum accepted message size.
pub const MAX_MESSAGE_SIZE: usize = 1 << 20;

/// URL path of the download subtest.
pub const DOWNLOAD_URL_PATH: &str = "/ndt/v7/download";

/// URL path of the upload subtest.
pub const UPLOAD_URL_PATH: &str = "/ndt/v7/upload";

/// Time after which the download must stop.
pub const DOWNLOAD_TIMEOUT: Duration = Duration::from_secs(15);

/// Time after which the upload must stop.
pub const UPLOAD_TIMEOUT: Duration = Duration::from_secs(10);

/// Deadline for individual I/O operations.
pub const IO_TIMEOUT: Duration = Duration::from_secs(7);

/// Size of the messages sent by the uploader.
pub const BULK_MESSAGE_SIZE: usize = 1 << 13;

/// Interval between client-side upload samples.
pub const UPDATE_INTERVAL: Duration = Duration::from_millis(250);
