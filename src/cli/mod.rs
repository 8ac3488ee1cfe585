//! Command implementations for the `fds` binary
//!
//! ```bash
//! fds ls my-bucket --prefix photos/ --delimiter /
//! fds put my-bucket ./video.mp4 --content-type video/mp4
//! fds presign my-bucket video.mp4 --method GET --expires-secs 600
//! fds uploads my-bucket
//! ```

pub mod commands;
