use crate::wire::UsbError;

/// Error taxonomy for the acquisition core.
///
/// Each variant collapses a family of lower-level failures into one of
/// the six kinds the driver's callers need to distinguish; the
/// variant's fields carry just enough context to explain *which*
/// precondition or transport call failed. Wraps [`UsbError`] via
/// `From` so transport failures convert without an explicit match at
/// every call site.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "std", derive(thiserror::Error))]
#[non_exhaustive]
pub enum Fx2LafwError {
    /// Input precondition violated: bad stage/probe index, unknown
    /// config key, or a device reference that doesn't resolve.
    #[cfg_attr(feature = "std", error("invalid argument: {0}"))]
    Arg(&'static str),

    /// Feature requested on a variant that doesn't support it (e.g.
    /// external clock on a non-DSLogic device).
    #[cfg_attr(feature = "std", error("unavailable on this variant: {0}"))]
    Unavailable(&'static str),

    /// The underlying USB call failed.
    #[cfg_attr(feature = "std", error("USB transport error: {0:?}"))]
    Transport(UsbError),

    /// A protocol-level expectation was violated: firmware version
    /// mismatch, short bitstream transfer, samplerate not expressible
    /// at the current width.
    #[cfg_attr(feature = "std", error("protocol error: {0}"))]
    Protocol(ProtocolError),

    /// Allocation failed (out of transfer slots, out of buffer
    /// memory).
    #[cfg_attr(feature = "std", error("resource exhausted: {0}"))]
    Resource(&'static str),

    /// An invariant the driver itself is responsible for was broken.
    #[cfg_attr(feature = "std", error("internal error (bug): {0}"))]
    Bug(&'static str),
}

impl From<UsbError> for Fx2LafwError {
    fn from(e: UsbError) -> Self {
        Fx2LafwError::Transport(e)
    }
}

impl From<ProtocolError> for Fx2LafwError {
    fn from(e: ProtocolError) -> Self {
        Fx2LafwError::Protocol(e)
    }
}

/// The specific protocol-level failures the driver can detect.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "std", derive(thiserror::Error))]
#[non_exhaustive]
pub enum ProtocolError {
    /// Firmware's major version didn't match the value this driver
    /// was built against; open() refuses to claim the interface.
    #[cfg_attr(
        feature = "std",
        error("firmware major version {found} != required {required}")
    )]
    FirmwareVersionMismatch { found: u8, required: u8 },

    /// The FPGA bitstream transport read fewer bytes than the file
    /// contained, or a bulk-out chunk wrote short.
    #[cfg_attr(feature = "std", error("short bitstream transfer"))]
    ShortBitstreamTransfer,

    /// No combination of parent clock and divider can express the
    /// requested samplerate (or it exceeds width-dependent limits).
    #[cfg_attr(feature = "std", error("samplerate {0} Hz not achievable"))]
    SamplerateNotExpressible(u64),
}

pub type Result<T> = core::result::Result<T, Fx2LafwError>;
