mod config_test;
mod support;
