//! Auth key generation over an open connection.

use tether_mtproto::Session;
use tether_mtproto::authentication::{self as auth, Finished};
use tether_mtproto::message::{pack_plain, unpack_plain};
use tether_tl_types::{Deserializable, RemoteCall, Serializable};

use crate::errors::ConnectError;
use crate::transport::{FrameReader, FrameWriter};

/// Run the three-round DH exchange as plaintext messages.
///
/// The caller bounds the whole exchange with its own timeout.
pub(crate) async fn do_authentication<R, W>(
    reader: &mut R,
    writer: &mut W,
) -> Result<Finished, ConnectError>
where
    R: FrameReader,
    W: FrameWriter,
{
    // Only used to mint plaintext msg ids.
    let mut ids = Session::new(None);

    let (req, step) = auth::step1()?;
    let res_pq = plain_call(&mut ids, reader, writer, &req).await?;

    let (req, step) = auth::step2(step, res_pq)?;
    let dh_params = plain_call(&mut ids, reader, writer, &req).await?;

    let (req, step) = auth::step3(step, dh_params)?;
    let answer = plain_call(&mut ids, reader, writer, &req).await?;

    let done = auth::finish(step, answer)?;
    tracing::info!("[tether] auth key generated (time offset {}s)", done.time_offset);
    Ok(done)
}

async fn plain_call<R, W, F>(
    ids: &mut Session,
    reader: &mut R,
    writer: &mut W,
    request: &F,
) -> Result<F::Return, ConnectError>
where
    R: FrameReader,
    W: FrameWriter,
    F: RemoteCall,
{
    writer.send(&pack_plain(ids.new_msg_id(), &request.to_bytes())).await?;
    let frame = reader.recv().await?;
    let (_, body) = unpack_plain(&frame)?;
    Ok(F::Return::from_bytes(body)?)
}
