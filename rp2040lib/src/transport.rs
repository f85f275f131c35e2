//! The byte pipe underneath a [crate::Link].
//!
//! Outbound, the scheduler needs a blocking write with an upper bound on
//! how long it may take. Inbound, something has to pump bytes into
//! [crate::Inbound::on_bytes_received]; [spawn_reader] does that from a
//! thread for anything implementing [embedded_io::Read].

use std::time::{Duration, Instant};

pub use embedded_io_adapters::std::FromStd;

use crate::Inbound;

/// Why a transport write failed.
#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    #[error("write did not complete within {0:?}")]
    Timeout(Duration),
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

/// Outbound half of the link.
pub trait Transport {
    /// Write all of `data`, or fail. Must not take much longer than
    /// `timeout`.
    fn write(&mut self, data: &[u8], timeout: Duration) -> Result<(), TransportError>;
}

impl<T> Transport for &mut T
where
    T: Transport + ?Sized,
{
    fn write(&mut self, data: &[u8], timeout: Duration) -> Result<(), TransportError> {
        (**self).write(data, timeout)
    }
}

impl<T> Transport for Box<T>
where
    T: Transport + ?Sized,
{
    fn write(&mut self, data: &[u8], timeout: Duration) -> Result<(), TransportError> {
        (**self).write(data, timeout)
    }
}

fn convert_error<E>(err: E, timeout: Duration) -> TransportError
where
    E: Into<std::io::Error>,
{
    let err = err.into();
    match err.kind() {
        std::io::ErrorKind::TimedOut => TransportError::Timeout(timeout),
        _ => TransportError::Io(err),
    }
}

/// A [Transport] over any [embedded_io::Write].
///
/// The writer is expected to enforce its own timeout (serial ports and
/// sockets both can). A write that succeeds but took longer than allowed
/// is still reported as a timeout.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct IoTransport<W> {
    inner: W,
}

impl<W> IoTransport<W> {
    pub fn new(inner: W) -> Self {
        Self { inner }
    }

    pub fn inner(&self) -> &W {
        &self.inner
    }

    pub fn inner_mut(&mut self) -> &mut W {
        &mut self.inner
    }

    pub fn done(self) -> W {
        self.inner
    }
}

impl<T> IoTransport<FromStd<T>> {
    /// Wrap a [std::io::Write].
    pub fn new_std(inner: T) -> Self {
        Self::new(FromStd::new(inner))
    }
}

impl<W> Transport for IoTransport<W>
where
    W: embedded_io::Write,
    W::Error: Into<std::io::Error>,
{
    fn write(&mut self, data: &[u8], timeout: Duration) -> Result<(), TransportError> {
        let start = Instant::now();
        self.inner
            .write_all(data)
            .map_err(|e| convert_error(e, timeout))?;
        self.inner.flush().map_err(|e| convert_error(e, timeout))?;

        if start.elapsed() > timeout {
            return Err(TransportError::Timeout(timeout));
        }
        Ok(())
    }
}

/// Pump bytes from `reader` into `inbound` on a new thread.
///
/// Read timeouts are not errors, they just give the thread a chance to
/// notice shutdown. End of stream and other read errors stop the link.
/// A persistent desync is logged and the link keeps running.
pub fn spawn_reader<R>(
    mut reader: R,
    inbound: Inbound,
) -> std::io::Result<std::thread::JoinHandle<()>>
where
    R: embedded_io::Read + Send + 'static,
    R::Error: Into<std::io::Error>,
{
    std::thread::Builder::new()
        .name("rp2040-reader".to_owned())
        .spawn(move || {
            let mut buf = [0u8; 512];
            while !inbound.is_shutdown() {
                match reader.read(&mut buf) {
                    Ok(0) => {
                        log::debug!("transport reached end of stream");
                        inbound.fail(crate::Error::Closed);
                        break;
                    }
                    Ok(amt) => {
                        log::trace!("received {} bytes", amt);
                        match inbound.on_bytes_received(&buf[..amt]) {
                            Ok(false) => {}
                            Ok(true) => log::warn!("reader sees a persistent desync"),
                            // already recorded as fatal
                            Err(_) => break,
                        }
                    }
                    Err(e) => {
                        let e: std::io::Error = e.into();
                        match e.kind() {
                            std::io::ErrorKind::TimedOut
                            | std::io::ErrorKind::WouldBlock
                            | std::io::ErrorKind::Interrupted => continue,
                            _ => {
                                log::error!("transport read failed: {}", e);
                                inbound.fail(crate::Error::Io(e));
                                break;
                            }
                        }
                    }
                }
            }
        })
}

#[cfg(test)]
mod test {
    use super::*;

    struct SlowWriter;

    impl std::io::Write for SlowWriter {
        fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
            std::thread::sleep(Duration::from_millis(20));
            Ok(buf.len())
        }

        fn flush(&mut self) -> std::io::Result<()> {
            Ok(())
        }
    }

    struct TimingOutWriter;

    impl std::io::Write for TimingOutWriter {
        fn write(&mut self, _buf: &[u8]) -> std::io::Result<usize> {
            Err(std::io::ErrorKind::TimedOut.into())
        }

        fn flush(&mut self) -> std::io::Result<()> {
            Ok(())
        }
    }

    #[test]
    fn writes_through() {
        let mut t = IoTransport::new_std(Vec::new());
        t.write(&[1, 2, 3], Duration::from_secs(1)).unwrap();
        t.write(&[4], Duration::from_secs(1)).unwrap();
        assert_eq!(t.done().into_inner(), vec![1, 2, 3, 4]);
    }

    #[test]
    fn slow_write_is_timeout() {
        let mut t = IoTransport::new_std(SlowWriter);
        let res = t.write(&[1], Duration::from_millis(1));
        assert!(matches!(res, Err(TransportError::Timeout(_))));
    }

    #[test]
    fn timed_out_kind_is_timeout() {
        let mut t = IoTransport::new_std(TimingOutWriter);
        let res = t.write(&[1], Duration::from_secs(1));
        assert!(matches!(res, Err(TransportError::Timeout(_))));
    }

    #[test]
    fn boxed_transport() {
        let mut t: Box<dyn Transport> = Box::new(IoTransport::new_std(Vec::new()));
        assert!(t.write(&[0xfe], Duration::from_secs(1)).is_ok());
    }

    struct BrokenWriter;

    impl std::io::Write for BrokenWriter {
        fn write(&mut self, _buf: &[u8]) -> std::io::Result<usize> {
            Err(std::io::ErrorKind::BrokenPipe.into())
        }

        fn flush(&mut self) -> std::io::Result<()> {
            Ok(())
        }
    }

    struct DeniedReader;

    impl std::io::Read for DeniedReader {
        fn read(&mut self, _buf: &mut [u8]) -> std::io::Result<usize> {
            Err(std::io::ErrorKind::PermissionDenied.into())
        }
    }

    #[test]
    fn write_error_kind_kept() {
        let mut t = IoTransport::new_std(BrokenWriter);
        match t.write(&[1], Duration::from_secs(1)) {
            Err(TransportError::Io(e)) => assert_eq!(e.kind(), std::io::ErrorKind::BrokenPipe),
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn read_error_kind_kept() {
        let link = crate::Link::new(crate::LinkConfig::default()).unwrap();
        let reader = spawn_reader(FromStd::new(DeniedReader), link.inbound()).unwrap();
        reader.join().unwrap();

        struct Idle;
        impl Transport for Idle {
            fn write(&mut self, _data: &[u8], _timeout: Duration) -> Result<(), TransportError> {
                Ok(())
            }
        }

        match link.run(Idle) {
            Err(crate::Error::Io(e)) => {
                assert_eq!(e.kind(), std::io::ErrorKind::PermissionDenied)
            }
            other => panic!("unexpected {:?}", other),
        }
    }
}
