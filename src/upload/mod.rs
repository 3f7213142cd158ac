//! Line framing for file uploads over the serial console
//!
//! ```text
//! ###BEGIN### profile2.json
//! { ...document lines... }
//! ###END###
//! ```
//!
//! Outside a recording, every other non-empty line belongs to the console.

use tracing::{debug, info, warn};

use crate::error::UploadError;

pub const BEGIN_MARKER: &str = "###BEGIN###";
pub const END_MARKER: &str = "###END###";

/// Outcome of feeding one line
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UploadEvent {
    /// Nothing to do (blank line, or a line captured into the buffer)
    Pending,
    /// A console command line
    Forward(String),
    /// Recording started for this flash path
    Started(String),
    /// END seen; write `data` to `path`
    Complete { path: String, data: Vec<u8> },
    Rejected(UploadError),
}

#[derive(Debug)]
enum State {
    Idle,
    Recording { path: String, buffer: String },
}

pub struct UploadProtocol {
    state: State,
    max_bytes: usize,
}

impl UploadProtocol {
    pub fn new(max_bytes: usize) -> Self {
        Self {
            state: State::Idle,
            max_bytes,
        }
    }

    pub fn is_recording(&self) -> bool {
        matches!(self.state, State::Recording { .. })
    }

    pub fn feed(&mut self, line: &str) -> UploadEvent {
        let line = line.trim_end_matches(['\r', '\n']);

        match &mut self.state {
            State::Idle => {
                let trimmed = line.trim();
                if let Some(rest) = trimmed.strip_prefix(BEGIN_MARKER) {
                    return match flash_path(rest.trim()) {
                        Ok(path) => {
                            info!("upload to {} started", path);
                            self.state = State::Recording {
                                path: path.clone(),
                                buffer: String::new(),
                            };
                            UploadEvent::Started(path)
                        }
                        Err(e) => {
                            warn!("upload rejected: {}", e);
                            UploadEvent::Rejected(e)
                        }
                    };
                }
                if trimmed == END_MARKER {
                    warn!("stray upload END marker");
                    return UploadEvent::Rejected(UploadError::StrayEnd);
                }
                if trimmed.is_empty() {
                    UploadEvent::Pending
                } else {
                    UploadEvent::Forward(trimmed.to_string())
                }
            }
            State::Recording { path, buffer } => {
                if line.trim() == END_MARKER {
                    let path = std::mem::take(path);
                    let data = std::mem::take(buffer).into_bytes();
                    self.state = State::Idle;
                    info!("upload to {} complete ({} bytes)", path, data.len());
                    return UploadEvent::Complete { path, data };
                }

                buffer.push_str(line);
                buffer.push('\n');
                if buffer.len() > self.max_bytes {
                    warn!("upload to {} exceeded {} bytes, dropped", path, self.max_bytes);
                    self.state = State::Idle;
                    return UploadEvent::Rejected(UploadError::TooLarge {
                        limit: self.max_bytes,
                    });
                }
                debug!("upload buffered {} bytes", buffer.len());
                UploadEvent::Pending
            }
        }
    }
}

/// Turn an uploaded filename into an absolute flash path
fn flash_path(name: &str) -> Result<String, UploadError> {
    let relative = name.trim_start_matches('/');
    if relative.is_empty() {
        return Err(UploadError::MissingFilename);
    }
    let bad = relative.contains('\\')
        || relative
            .split('/')
            .any(|part| part.is_empty() || part == "." || part == "..");
    if bad {
        return Err(UploadError::BadFilename(name.to_string()));
    }
    Ok(format!("/{}", relative))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_records_between_markers() {
        let mut upload = UploadProtocol::new(1024);
        assert_eq!(
            upload.feed("###BEGIN### profile2.json\r"),
            UploadEvent::Started("/profile2.json".to_string())
        );
        assert!(upload.is_recording());
        // Recorded lines keep their indentation, commands are not interpreted
        assert_eq!(upload.feed("{"), UploadEvent::Pending);
        assert_eq!(upload.feed("  \"profile_name\": \"x\""), UploadEvent::Pending);
        assert_eq!(upload.feed("status"), UploadEvent::Pending);
        assert_eq!(upload.feed("}"), UploadEvent::Pending);
        assert_eq!(
            upload.feed("###END###"),
            UploadEvent::Complete {
                path: "/profile2.json".to_string(),
                data: b"{\n  \"profile_name\": \"x\"\nstatus\n}\n".to_vec(),
            }
        );
        assert!(!upload.is_recording());
    }

    #[test]
    fn test_idle_lines_are_forwarded() {
        let mut upload = UploadProtocol::new(1024);
        assert_eq!(upload.feed("  ls  "), UploadEvent::Forward("ls".to_string()));
        assert_eq!(upload.feed(""), UploadEvent::Pending);
        assert_eq!(
            upload.feed("###END###"),
            UploadEvent::Rejected(UploadError::StrayEnd)
        );
        assert!(!upload.is_recording());
    }

    #[test]
    fn test_bad_filenames_are_rejected() {
        let mut upload = UploadProtocol::new(1024);
        assert_eq!(
            upload.feed("###BEGIN###"),
            UploadEvent::Rejected(UploadError::MissingFilename)
        );
        assert_eq!(
            upload.feed("###BEGIN### ../etc/passwd"),
            UploadEvent::Rejected(UploadError::BadFilename("../etc/passwd".to_string()))
        );
        assert!(matches!(
            upload.feed("###BEGIN### a//b"),
            UploadEvent::Rejected(UploadError::BadFilename(_))
        ));
        assert_eq!(
            upload.feed("###BEGIN### /backups/x.bak"),
            UploadEvent::Started("/backups/x.bak".to_string())
        );
    }

    #[test]
    fn test_oversized_upload_is_dropped() {
        let mut upload = UploadProtocol::new(8);
        upload.feed("###BEGIN### big.json");
        assert_eq!(upload.feed("1234"), UploadEvent::Pending);
        assert_eq!(
            upload.feed("5678"),
            UploadEvent::Rejected(UploadError::TooLarge { limit: 8 })
        );
        assert!(!upload.is_recording());
        assert_eq!(upload.feed("###END###"), UploadEvent::Rejected(UploadError::StrayEnd));
    }
}
