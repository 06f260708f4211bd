pub mod shared_vars;
