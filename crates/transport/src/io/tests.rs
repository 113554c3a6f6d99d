//! Tests for transport implementations

use super::*;

#[test]
fn test_tcp_transport_implements_trait() {
    fn _assert_impl<T: DebugTransport>() {}
    _assert_impl::<TcpTransport>();
}

#[test]
fn test_memory_transport_implements_trait() {
    fn _assert_impl<T: DebugTransport>() {}
    _assert_impl::<InMemoryTransport>();
}
