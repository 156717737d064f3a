//! `HttpSynthesizer`: client for a local TTS HTTP server.
//!
//! ## Protocol
//!
//! | Request | Body | Success |
//! |---------|------|---------|
//! | `GET /health` | - | `200 {"status":"ok"}` |
//! | `POST /synthesize` | `{"text", "output_path"}` | `200 {"status":"ok","output_path"}` |
//!
//! The server writes a WAV file to `output_path`, which must live under the
//! system temp directory; failures answer `500 {"error"}` and malformed
//! requests `400`. The client decodes the WAV into a single mono
//! `AudioChunk` and removes the file. An echoed `output_path` outside the
//! temp directory is rejected and never touched.

use std::path::{Component, Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::buffering::chunk::AudioChunk;
use crate::engine::cancel::CancellationToken;
use crate::error::{Result, SpeechError};
use crate::synthesis::SpeechSynthesizer;

pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(60);

static OUTPUT_SEQ: AtomicU64 = AtomicU64::new(0);

#[derive(Debug, Serialize)]
struct SynthesizeRequest<'a> {
    text: &'a str,
    output_path: &'a str,
}

#[derive(Debug, Deserialize)]
struct SynthesizeResponse {
    status: Option<String>,
    output_path: Option<String>,
    error: Option<String>,
}

#[derive(Debug, Deserialize)]
struct HealthResponse {
    status: String,
}

/// Blocking client for the `/synthesize` + `/health` server protocol.
pub struct HttpSynthesizer {
    client: reqwest::blocking::Client,
    base_url: String,
    requests: u64,
}

impl HttpSynthesizer {
    /// # Errors
    /// Returns `SpeechError::Backend` if the HTTP client cannot be built.
    pub fn new(base_url: impl Into<String>, timeout: Duration) -> Result<Self> {
        let client = reqwest::blocking::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| SpeechError::Backend(format!("http client build failed: {e}")))?;
        Ok(Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            requests: 0,
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// Probe `GET /health`.
    pub fn health(&self) -> Result<()> {
        let url = format!("{}/health", self.base_url);
        let response = self
            .client
            .get(&url)
            .send()
            .map_err(|e| SpeechError::Backend(format!("health check failed: {e}")))?;
        if !response.status().is_success() {
            return Err(SpeechError::Backend(format!(
                "health check returned {}",
                response.status()
            )));
        }
        let body: HealthResponse = response
            .json()
            .map_err(|e| SpeechError::Backend(format!("invalid health response: {e}")))?;
        if body.status != "ok" {
            return Err(SpeechError::Backend(format!(
                "server reports status {:?}",
                body.status
            )));
        }
        Ok(())
    }

    fn request_wav(&mut self, text: &str, output_path: &Path) -> Result<PathBuf> {
        self.requests += 1;
        let output = output_path.to_string_lossy();
        let url = format!("{}/synthesize", self.base_url);

        debug!(request = self.requests, chars = text.chars().count(), "POST /synthesize");
        let response = self
            .client
            .post(&url)
            .json(&SynthesizeRequest {
                text,
                output_path: &output,
            })
            .send()
            .map_err(|e| SpeechError::Synthesis(format!("request failed: {e}")))?;

        let status = response.status();
        let body = response
            .text()
            .map_err(|e| SpeechError::Synthesis(format!("reading response failed: {e}")))?;
        let parsed = serde_json::from_str::<SynthesizeResponse>(&body).ok();

        if !status.is_success() {
            let detail = parsed
                .and_then(|r| r.error)
                .unwrap_or_else(|| body.trim().to_string());
            return Err(SpeechError::Synthesis(format!("server returned {status}: {detail}")));
        }

        match parsed {
            Some(SynthesizeResponse {
                error: Some(error), ..
            }) => Err(SpeechError::Synthesis(error)),
            Some(SynthesizeResponse {
                status: Some(ref s),
                ..
            }) if s != "ok" => Err(SpeechError::Synthesis(format!("server status {s:?}"))),
            Some(SynthesizeResponse {
                output_path: Some(path),
                ..
            }) => {
                let path = PathBuf::from(path);
                if is_temp_file(&path) {
                    Ok(path)
                } else {
                    Err(SpeechError::Synthesis(format!(
                        "server wrote outside the temp directory: {}",
                        path.display()
                    )))
                }
            }
            _ => Ok(output_path.to_path_buf()),
        }
    }
}

impl SpeechSynthesizer for HttpSynthesizer {
    fn warm_up(&mut self) -> Result<()> {
        self.health()?;
        info!(url = %self.base_url, "synthesis server healthy");
        Ok(())
    }

    fn synthesize(&mut self, text: &str, cancel: &CancellationToken) -> Result<Vec<AudioChunk>> {
        let text = text.trim();
        if text.is_empty() || cancel.is_cancelled() {
            return Ok(vec![]);
        }

        let output_path = temp_output_path();
        let result = self
            .request_wav(text, &output_path)
            .and_then(|written| decode_wav_file(&written).map(|chunk| (written, chunk)));

        let chunk = match result {
            Ok((written, chunk)) => {
                remove_quietly(&written);
                if written != output_path {
                    remove_quietly(&output_path);
                }
                chunk
            }
            Err(e) => {
                remove_quietly(&output_path);
                return Err(e);
            }
        };

        // The request itself cannot be interrupted; drop its result instead.
        if cancel.is_cancelled() {
            debug!("cancelled during synthesis request; discarding audio");
            return Ok(vec![]);
        }
        Ok(vec![chunk])
    }
}

/// Unique WAV path under the system temp directory.
fn temp_output_path() -> PathBuf {
    let seq = OUTPUT_SEQ.fetch_add(1, Ordering::Relaxed);
    std::env::temp_dir().join(format!("murmur-{}-{seq}.wav", std::process::id()))
}

/// Absolute, under the temp directory, with no `..` components.
fn is_temp_file(path: &Path) -> bool {
    path.is_absolute()
        && path.starts_with(std::env::temp_dir())
        && !path.components().any(|c| matches!(c, Component::ParentDir))
}

fn remove_quietly(path: &Path) {
    if let Err(e) = std::fs::remove_file(path) {
        if e.kind() != std::io::ErrorKind::NotFound {
            warn!(path = %path.display(), error = %e, "failed to remove synthesized wav");
        }
    }
}

/// Decode a WAV file (int or float samples) into one mono chunk.
pub fn decode_wav_file(path: &Path) -> Result<AudioChunk> {
    let mut reader = hound::WavReader::open(path)?;
    let spec = reader.spec();
    let channels = usize::from(spec.channels.max(1));

    let interleaved: Vec<f32> = match spec.sample_format {
        hound::SampleFormat::Float => reader
            .samples::<f32>()
            .collect::<std::result::Result<Vec<_>, _>>()?,
        hound::SampleFormat::Int => {
            let max = ((1_i64 << (spec.bits_per_sample.saturating_sub(1))) - 1).max(1) as f32;
            reader
                .samples::<i32>()
                .map(|s| s.map(|v| v as f32 / max))
                .collect::<std::result::Result<Vec<_>, _>>()?
        }
    };

    let samples = if channels == 1 {
        interleaved
    } else {
        interleaved
            .chunks(channels)
            .map(|frame| frame.iter().sum::<f32>() / frame.len() as f32)
            .collect()
    };

    Ok(AudioChunk::new(samples, spec.sample_rate))
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use std::io::{BufRead, BufReader, Read, Write};
    use std::net::{TcpListener, TcpStream};
    use std::thread;

    fn write_wav(path: &Path, channels: u16, samples: &[i16]) {
        let spec = hound::WavSpec {
            channels,
            sample_rate: 22_050,
            bits_per_sample: 16,
            sample_format: hound::SampleFormat::Int,
        };
        let mut writer = hound::WavWriter::create(path, spec).expect("create wav");
        for &s in samples {
            writer.write_sample(s).expect("write sample");
        }
        writer.finalize().expect("finalize wav");
    }

    /// Answer a single request on a loopback port. The handler receives the
    /// request body and returns `(status code, response body)`.
    fn serve_once<F>(handler: F) -> (String, thread::JoinHandle<String>)
    where
        F: FnOnce(&str) -> (u16, String) + Send + 'static,
    {
        let listener = TcpListener::bind("127.0.0.1:0").expect("bind");
        let url = format!("http://{}", listener.local_addr().expect("addr"));
        let handle = thread::spawn(move || {
            let (mut stream, _) = listener.accept().expect("accept");
            let body = read_request_body(&mut stream);
            let (code, response) = handler(&body);
            write!(
                stream,
                "HTTP/1.1 {code} Status\r\nContent-Type: application/json\r\n\
                 Content-Length: {}\r\nConnection: close\r\n\r\n{response}",
                response.len()
            )
            .expect("write response");
            body
        });
        (url, handle)
    }

    fn read_request_body(stream: &mut TcpStream) -> String {
        let mut reader = BufReader::new(stream);
        let mut content_length = 0usize;
        loop {
            let mut line = String::new();
            reader.read_line(&mut line).expect("read header");
            let line = line.trim_end();
            if line.is_empty() {
                break;
            }
            if let Some((name, value)) = line.split_once(':') {
                if name.eq_ignore_ascii_case("content-length") {
                    content_length = value.trim().parse().expect("content length");
                }
            }
        }
        let mut body = vec![0u8; content_length];
        reader.read_exact(&mut body).expect("read body");
        String::from_utf8(body).expect("utf-8 body")
    }

    fn requested_path(body: &str) -> PathBuf {
        let json: serde_json::Value = serde_json::from_str(body).expect("json body");
        PathBuf::from(json["output_path"].as_str().expect("output_path"))
    }

    fn client(url: &str) -> HttpSynthesizer {
        HttpSynthesizer::new(url, Duration::from_secs(5)).expect("client")
    }

    #[test]
    fn decodes_the_wav_at_the_echoed_path_and_removes_it() {
        let (url, server) = serve_once(|body| {
            let requested = requested_path(body);
            let written = requested.with_extension("out.wav");
            write_wav(&written, 1, &[0, 100, 200, 300]);
            let reply = serde_json::json!({ "status": "ok", "output_path": written });
            (200, reply.to_string())
        });

        let chunks = client(&url)
            .synthesize("  Hello there.  ", &CancellationToken::new())
            .expect("synthesis succeeds");
        let body = server.join().expect("server thread");

        let json: serde_json::Value = serde_json::from_str(&body).expect("json body");
        assert_eq!(json["text"], "Hello there.");
        assert_eq!(chunks.len(), 1);
        assert_eq!(chunks[0].samples.len(), 4);
        assert_eq!(chunks[0].sample_rate, 22_050);
        assert!(!requested_path(&body).with_extension("out.wav").exists());
    }

    #[test]
    fn server_error_is_a_synthesis_failure_and_cleans_up() {
        let (url, server) = serve_once(|body| {
            std::fs::write(requested_path(body), b"partial").expect("write partial file");
            (500, r#"{"error":"model exploded"}"#.to_string())
        });

        let err = client(&url)
            .synthesize("Hello.", &CancellationToken::new())
            .expect_err("server error must fail");
        let body = server.join().expect("server thread");

        match err {
            SpeechError::Synthesis(msg) => assert!(msg.contains("model exploded"), "{msg}"),
            other => panic!("unexpected error: {other:?}"),
        }
        assert!(!requested_path(&body).exists());
    }

    #[test]
    fn non_ok_status_is_a_synthesis_failure() {
        let (url, server) = serve_once(|_| (200, r#"{"status":"busy"}"#.to_string()));

        let err = client(&url)
            .synthesize("Hello.", &CancellationToken::new())
            .expect_err("non-ok status must fail");
        server.join().expect("server thread");

        match err {
            SpeechError::Synthesis(msg) => assert!(msg.contains("busy"), "{msg}"),
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn echoed_path_outside_temp_dir_is_rejected() {
        let (url, server) = serve_once(|_| {
            (200, r#"{"status":"ok","output_path":"/etc/murmur-foreign.wav"}"#.to_string())
        });

        let err = client(&url)
            .synthesize("Hello.", &CancellationToken::new())
            .expect_err("foreign path must fail");
        server.join().expect("server thread");

        assert!(matches!(err, SpeechError::Synthesis(_)));
    }

    #[test]
    fn temp_file_check_rejects_escapes() {
        let tmp = std::env::temp_dir();
        assert!(is_temp_file(&tmp.join("murmur-1.wav")));
        assert!(!is_temp_file(&tmp.join("../murmur-1.wav")));
        assert!(!is_temp_file(Path::new("relative.wav")));
    }

    #[test]
    fn decodes_mono_int_wav() {
        let path = temp_output_path();
        write_wav(&path, 1, &[0, i16::MAX, -i16::MAX]);

        let chunk = decode_wav_file(&path).expect("decode");
        remove_quietly(&path);

        assert_eq!(chunk.sample_rate, 22_050);
        assert_eq!(chunk.samples.len(), 3);
        assert_relative_eq!(chunk.samples[1], 1.0, epsilon = 1e-4);
        assert_relative_eq!(chunk.samples[2], -1.0, epsilon = 1e-4);
    }

    #[test]
    fn downmixes_stereo_to_mono() {
        let path = temp_output_path();
        write_wav(&path, 2, &[i16::MAX, 0, 0, 0]);

        let chunk = decode_wav_file(&path).expect("decode");
        remove_quietly(&path);

        assert_eq!(chunk.samples.len(), 2);
        assert_relative_eq!(chunk.samples[0], 0.5, epsilon = 1e-4);
        assert_relative_eq!(chunk.samples[1], 0.0);
    }

    #[test]
    fn temp_paths_are_unique_and_in_temp_dir() {
        let a = temp_output_path();
        let b = temp_output_path();
        assert_ne!(a, b);
        assert!(a.starts_with(std::env::temp_dir()));
    }

    #[test]
    fn cancelled_or_blank_requests_skip_the_network() {
        // Port 9 (discard) is never contacted: both calls return before sending.
        let mut synth =
            HttpSynthesizer::new("http://127.0.0.1:9/", Duration::from_millis(50)).expect("client");
        assert_eq!(synth.base_url(), "http://127.0.0.1:9");

        let cancel = CancellationToken::new();
        assert!(synth.synthesize("   ", &cancel).expect("blank").is_empty());
        cancel.cancel();
        assert!(synth.synthesize("Hello.", &cancel).expect("cancelled").is_empty());
        assert_eq!(synth.requests, 0);
    }
}
