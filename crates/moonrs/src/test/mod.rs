pub mod test_gc;
