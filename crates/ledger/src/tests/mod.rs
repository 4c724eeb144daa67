//! Scenario tests against a simulated roster


mod rpc_test;
