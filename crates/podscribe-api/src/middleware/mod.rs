mod node_auth;

pub use node_auth::{node_auth_middleware, AuthedNode};
