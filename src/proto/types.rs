//! Closed enumerations of the link protocol.
//!
//! Every code that crosses the wire has exactly one variant here. Decoding
//! an unknown code is explicit: `from_code` returns `None` and the caller
//! decides whether to drop, log or map it.

use crate::error::{Error, ProtoError};

macro_rules! wire_enum {
    (
        $(#[$meta:meta])*
        $name:ident : $repr:ident { $($(#[$vmeta:meta])* $variant:ident = $code:literal),+ $(,)? }
    ) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
        #[repr($repr)]
        pub enum $name {
            $($(#[$vmeta])* $variant = $code),+
        }

        impl $name {
            pub const fn code(self) -> $repr {
                self as $repr
            }

            pub const fn from_code(code: $repr) -> Option<Self> {
                match code {
                    $($code => Some(Self::$variant),)+
                    _ => None,
                }
            }
        }

        impl TryFrom<$repr> for $name {
            type Error = ProtoError;

            fn try_from(code: $repr) -> Result<Self, ProtoError> {
                Self::from_code(code).ok_or(ProtoError::Format)
            }
        }
    };
}

wire_enum! {
    /// Frame `msg_type` byte.
    MessageType: u8 {
        Hello = 0x01,
        HelloAck = 0x02,
        Ping = 0x03,
        Pong = 0x04,
        CmdReq = 0x10,
        CmdRsp = 0x11,
        Evt = 0x20,
        Snapshot = 0x21,
        DeviceBlobChunk = 0x22,
    }
}

wire_enum! {
    /// `cmd_id` of a command request.
    CommandId: u8 {
        OnOff = 1,
        Level = 2,
        ColorXy = 3,
        ColorTemp = 4,
        PermitJoin = 5,
        ReadAttr = 6,
        WriteAttr = 7,
        Identify = 8,
        SyncSnapshot = 9,
        SyncDeviceBlob = 10,
        SetDeviceName = 11,
        RemoveDevice = 12,
        WifiConfigSet = 13,
        NetServicesStart = 14,
    }
}

wire_enum! {
    /// `evt_id` of an event record.
    EventKind: u8 {
        AttrReport = 1,
        Command = 2,
        DeviceJoin = 3,
        DeviceLeave = 4,
        NetState = 5,
    }
}

wire_enum! {
    /// Value discriminant shared by commands, events and snapshot state.
    ValueType: u8 {
        None = 0,
        Bool = 1,
        I64 = 2,
        F32 = 3,
        Text = 4,
    }
}

wire_enum! {
    /// `kind` of a snapshot record.
    SnapshotKind: u8 {
        Begin = 1,
        Device = 2,
        Endpoint = 3,
        Remove = 4,
        End = 5,
        State = 6,
    }
}

wire_enum! {
    /// Status carried by a command response.
    Status: u16 {
        Ok = 0,
        InvalidArgs = 1,
        NotReady = 2,
        NotFound = 3,
        Unsupported = 4,
        Busy = 5,
        Timeout = 6,
        InternalError = 7,
        TransportCrcError = 100,
        TransportFormat = 101,
    }
}

impl Status {
    /// Decode a response status. Codes this side does not know are
    /// reported as `InternalError`.
    pub fn from_wire(code: u16) -> Self {
        Self::from_code(code).unwrap_or(Self::InternalError)
    }

    pub fn into_result(self) -> crate::Result<()> {
        match self {
            Self::Ok => Ok(()),
            Self::InvalidArgs => Err(Error::InvalidArgs),
            Self::NotReady => Err(Error::NotReady),
            Self::NotFound => Err(Error::NotFound),
            Self::Unsupported => Err(Error::Unsupported),
            Self::Busy => Err(Error::Busy),
            Self::Timeout => Err(Error::Timeout),
            Self::InternalError => Err(Error::Internal),
            Self::TransportCrcError => Err(Error::Proto(ProtoError::Crc)),
            Self::TransportFormat => Err(Error::Proto(ProtoError::Format)),
        }
    }

    /// Status a local error is reported as when answering a peer.
    pub fn from_error(err: Error) -> Self {
        match err {
            Error::InvalidArgs => Self::InvalidArgs,
            Error::NotReady => Self::NotReady,
            Error::NotFound => Self::NotFound,
            Error::Unsupported => Self::Unsupported,
            Error::Busy => Self::Busy,
            Error::Timeout => Self::Timeout,
            Error::Proto(ProtoError::Crc) => Self::TransportCrcError,
            Error::Proto(_) => Self::TransportFormat,
            _ => Self::InternalError,
        }
    }
}
