pub mod watched_path;
