pub mod change_filter;
