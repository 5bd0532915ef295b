//! Server-sent event framing shared by the HTTP adapters.

use crate::llm::ProviderError;
use futures::{Stream, StreamExt};

/// Split a response body into the payloads of its `data:` lines.
///
/// Bytes are buffered until a full line is available, so multi-byte
/// characters split across network chunks decode correctly.
pub(crate) fn data_lines(
    response: reqwest::Response,
) -> impl Stream<Item = Result<String, ProviderError>> + Send {
    async_stream::stream! {
        let mut buffer: Vec<u8> = Vec::new();
        let mut body = response.bytes_stream();

        while let Some(chunk) = body.next().await {
            let chunk = match chunk {
                Ok(chunk) => chunk,
                Err(e) => {
                    yield Err(ProviderError::from(e));
                    return;
                }
            };
            buffer.extend_from_slice(&chunk);

            while let Some(pos) = buffer.iter().position(|b| *b == b'\n') {
                let line: Vec<u8> = buffer.drain(..=pos).collect();
                if let Some(data) = parse_data_line(&line) {
                    yield Ok(data);
                }
            }
        }

        if let Some(data) = parse_data_line(&buffer) {
            yield Ok(data);
        }
    }
}

fn parse_data_line(line: &[u8]) -> Option<String> {
    let line = String::from_utf8_lossy(line);
    let data = line.trim().strip_prefix("data:")?.trim_start();
    (!data.is_empty()).then(|| data.to_owned())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_data_line() {
        assert_eq!(parse_data_line(b"data: {\"a\":1}\r\n"), Some("{\"a\":1}".into()));
        assert_eq!(parse_data_line(b"data:[DONE]"), Some("[DONE]".into()));
        assert_eq!(parse_data_line(b": keep-alive\n"), None);
        assert_eq!(parse_data_line(b"event: message\n"), None);
        assert_eq!(parse_data_line(b"data: \n"), None);
    }
}
