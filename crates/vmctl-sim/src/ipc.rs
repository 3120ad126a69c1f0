// vmctl-sim/src/ipc.rs
// Length-prefixed JSON framing for endpoint connections
use anyhow::{Context, Result};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use vmctl_common::protocol::MAX_FRAME_SIZE;
use vmctl_common::{Envelope, Response};

/// Read a length-prefixed JSON request envelope from the stream
pub async fn read_envelope<S>(stream: &mut S) -> Result<Envelope>
where
    S: AsyncRead + Unpin,
{
    // Read the 4-byte length prefix (big-endian u32)
    let mut len_buf = [0u8; 4];
    stream
        .read_exact(&mut len_buf)
        .await
        .context("Failed to read request length")?;

    let len = u32::from_be_bytes(len_buf) as usize;

    if len > MAX_FRAME_SIZE {
        anyhow::bail!(
            "Request size {} exceeds maximum allowed size of {}",
            len,
            MAX_FRAME_SIZE
        );
    }

    if len == 0 {
        anyhow::bail!("Received empty request");
    }

    let mut buf = vec![0u8; len];
    stream
        .read_exact(&mut buf)
        .await
        .context("Failed to read request payload")?;

    let envelope: Envelope =
        serde_json::from_slice(&buf).context("Failed to parse request JSON")?;

    Ok(envelope)
}

/// Write a length-prefixed JSON response to the stream
pub async fn write_response<S>(stream: &mut S, response: &Response) -> Result<()>
where
    S: AsyncWrite + Unpin,
{
    let json_bytes = serde_json::to_vec(response).context("Failed to serialize response")?;

    if json_bytes.len() > MAX_FRAME_SIZE {
        anyhow::bail!(
            "Response size {} exceeds maximum allowed size of {}",
            json_bytes.len(),
            MAX_FRAME_SIZE
        );
    }

    let len = json_bytes.len() as u32;
    stream
        .write_all(&len.to_be_bytes())
        .await
        .context("Failed to write response length")?;

    stream
        .write_all(&json_bytes)
        .await
        .context("Failed to write response payload")?;

    stream.flush().await.context("Failed to flush response")?;

    Ok(())
}
