pub mod zen;
