mod protocol;

pub use protocol::{
    codes, EnvelopeError, Method, Request, Response, ServiceError, PROTOCOL_VERSION,
};
