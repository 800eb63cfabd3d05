pub mod test_gated_routes;
