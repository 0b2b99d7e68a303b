//! Client/server role resolution

use proto_infer::MessageType;

use crate::types::{Direction, Role, RoleHint};

/// Role implied by how the connection was set up.
///
/// Implicit connections carry no role information.
pub fn role_from_hint(hint: RoleHint) -> Role {
    match hint {
        RoleHint::Connect => Role::Client,
        RoleHint::Accept => Role::Server,
        RoleHint::Implicit => Role::Unknown,
    }
}

/// Role implied by one classified message.
///
/// ```text
/// direction  message   role
/// Egress     Request   Client
/// Egress     Response  Server
/// Ingress    Request   Server
/// Ingress    Response  Client
/// ```
///
/// Messages without a type (Redis) say nothing about the role.
pub fn role_from_traffic(direction: Direction, message_type: MessageType) -> Role {
    if message_type == MessageType::Unknown {
        return Role::Unknown;
    }
    if (direction == Direction::Egress) ^ (message_type == MessageType::Response) {
        Role::Client
    } else {
        Role::Server
    }
}
