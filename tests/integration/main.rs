//! Integration tests: the full pipeline against a mock broker.

mod mock_broker;
mod pipeline;
