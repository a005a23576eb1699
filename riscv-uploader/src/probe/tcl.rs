//! Minimal Tcl RPC client for the probe server's command port.
//!
//! The server speaks a line-less protocol: both directions are UTF-8 command
//! strings terminated by a 0x1A byte. Every command is wrapped in a
//! `catch` so that Tcl-level failures come back as a status code plus
//! message instead of tearing down the connection.

use std::io::{Read, Write};
use std::net::TcpStream;
use std::time::{Duration, Instant};

use super::{AccessWidth, ProbeError, TargetProbe};

const SEPARATOR: u8 = 0x1A;
const CONNECT_TIMEOUT: Duration = Duration::from_secs(5);
const CONNECT_RETRY_DELAY: Duration = Duration::from_millis(10);
const RECV_CHUNK: usize = 10240;

/// A [`TargetProbe`] backed by the Tcl command port of a probe server.
#[derive(Debug)]
pub struct TclProbe {
    stream: TcpStream,
}

impl TclProbe {
    /// The port the probe server listens on by default.
    pub const DEFAULT_PORT: u16 = 6666;

    /// Connect to a probe server, retrying until it accepts or the
    /// connect window expires.
    ///
    /// The server is often started moments before the uploader, so a
    /// freshly-refused connection is retried within a 5 second window.
    pub fn connect(host: &str, port: u16) -> Result<Self, ProbeError> {
        let address = format!("{host}:{port}");
        let deadline = Instant::now() + CONNECT_TIMEOUT;

        let stream = loop {
            match TcpStream::connect(&address) {
                Ok(stream) => break stream,
                Err(source) => {
                    if Instant::now() >= deadline {
                        return Err(ProbeError::Connect { address, source });
                    }
                    std::thread::sleep(CONNECT_RETRY_DELAY);
                }
            }
        };

        stream.set_nodelay(true)?;
        tracing::debug!("connected to probe server at {address}");

        Ok(TclProbe { stream })
    }

    /// Send one command string and read one 0x1A-terminated reply.
    fn send_recv(&mut self, command: &str) -> Result<String, ProbeError> {
        tracing::trace!("send: {command}");

        self.stream.write_all(command.as_bytes())?;
        self.stream.write_all(&[SEPARATOR])?;

        let mut data = Vec::new();
        let mut chunk = [0u8; RECV_CHUNK];
        loop {
            let n = self.stream.read(&mut chunk)?;
            if n == 0 {
                return Err(ProbeError::Protocol(
                    "connection closed mid-reply".to_string(),
                ));
            }
            data.extend_from_slice(&chunk[..n]);

            if let Some(index) = data.iter().position(|&b| b == SEPARATOR) {
                if index != data.len() - 1 {
                    return Err(ProbeError::Protocol(
                        "unhandled extra bytes after reply terminator".to_string(),
                    ));
                }
                data.truncate(index);
                break;
            }
        }

        let reply = String::from_utf8(data)
            .map_err(|_| ProbeError::Protocol("reply is not valid UTF-8".to_string()))?;
        tracing::trace!("recv: {reply}");
        Ok(reply)
    }

    fn capture(&mut self, command: &str) -> Result<String, ProbeError> {
        self.run(&format!("capture \"{command}\""))
    }
}

fn parse_hex_word(word: &str) -> Result<u32, ProbeError> {
    let digits = word.trim_start_matches("0x");
    u32::from_str_radix(digits, 16)
        .map_err(|_| ProbeError::Protocol(format!("expected a hex word, got {word:?}")))
}

impl TargetProbe for TclProbe {
    fn halt(&mut self) -> Result<(), ProbeError> {
        self.capture("halt").map(|_| ())
    }

    fn resume(&mut self, address: Option<u32>) -> Result<(), ProbeError> {
        match address {
            Some(address) => self.capture(&format!("resume {address:#010x}")),
            None => self.capture("resume"),
        }
        .map(|_| ())
    }

    fn reset_and_halt(&mut self) -> Result<(), ProbeError> {
        self.capture("reset halt").map(|_| ())
    }

    fn read_memory(
        &mut self,
        address: u32,
        width: AccessWidth,
        count: usize,
    ) -> Result<Vec<u32>, ProbeError> {
        let reply = self.capture(&format!(
            "read_memory {address:#010x} {} {count}",
            width.bits()
        ))?;

        let words = reply
            .split_whitespace()
            .map(parse_hex_word)
            .collect::<Result<Vec<u32>, ProbeError>>()?;

        if words.len() != count {
            return Err(ProbeError::Protocol(format!(
                "read_memory returned {} elements, expected {count}",
                words.len()
            )));
        }

        Ok(words)
    }

    fn write_memory(
        &mut self,
        address: u32,
        width: AccessWidth,
        data: &[u32],
    ) -> Result<(), ProbeError> {
        let elements = data
            .iter()
            .map(|word| format!("{word:#x}"))
            .collect::<Vec<_>>()
            .join(" ");

        self.capture(&format!(
            "write_memory {address:#010x} {} {{{elements}}}",
            width.bits()
        ))
        .map(|_| ())
    }

    fn run(&mut self, command: &str) -> Result<String, ProbeError> {
        // Wrap in `catch` so Tcl errors come back as "<code> <message>".
        let wrapped = format!("set _code [catch {{{command}}} _msg];expr {{\"$_code $_msg\"}}");
        let reply = self.send_recv(&wrapped)?;

        let (code, message) = reply
            .split_once(' ')
            .ok_or_else(|| ProbeError::Protocol(format!("unparseable reply {reply:?}")))?;
        let code: i32 = code
            .parse()
            .map_err(|_| ProbeError::Protocol(format!("non-numeric status in {reply:?}")))?;

        if code != 0 {
            return Err(ProbeError::Remote {
                code,
                message: message.to_string(),
            });
        }

        Ok(message.to_string())
    }
}

#[cfg(test)]
mod tests {
    use std::io::{Read, Write};
    use std::net::TcpListener;

    use super::*;

    #[test]
    fn hex_words_parse_with_and_without_prefix() {
        assert_eq!(parse_hex_word("0x12345678").unwrap(), 0x1234_5678);
        assert_eq!(parse_hex_word("deadbeef").unwrap(), 0xdead_beef);
        assert!(parse_hex_word("bogus").is_err());
    }

    /// One scripted exchange against a local listener: the reply framing and
    /// the catch-wrapper status parsing both have to hold.
    #[test]
    fn run_round_trip() {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let port = listener.local_addr().unwrap().port();

        let server = std::thread::spawn(move || {
            let (mut socket, _) = listener.accept().unwrap();
            let mut request = Vec::new();
            let mut byte = [0u8; 1];
            loop {
                socket.read_exact(&mut byte).unwrap();
                if byte[0] == 0x1A {
                    break;
                }
                request.push(byte[0]);
            }
            socket.write_all(b"0 0x00000012\x1a").unwrap();
            String::from_utf8(request).unwrap()
        });

        let mut probe = TclProbe::connect("127.0.0.1", port).unwrap();
        let reply = probe.run("read_memory 0x70014 8 1").unwrap();
        assert_eq!(reply, "0x00000012");

        let request = server.join().unwrap();
        assert!(request.contains("catch {read_memory 0x70014 8 1}"));
    }

    #[test]
    fn remote_errors_surface_code_and_message() {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let port = listener.local_addr().unwrap().port();

        std::thread::spawn(move || {
            let (mut socket, _) = listener.accept().unwrap();
            let mut sink = [0u8; 256];
            let _ = socket.read(&mut sink).unwrap();
            socket.write_all(b"1 invalid command\x1a").unwrap();
        });

        let mut probe = TclProbe::connect("127.0.0.1", port).unwrap();
        match probe.run("bogus") {
            Err(ProbeError::Remote { code, message }) => {
                assert_eq!(code, 1);
                assert_eq!(message, "invalid command");
            }
            other => panic!("expected a remote error, got {other:?}"),
        }
    }
}
