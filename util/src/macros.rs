#[macro_export]
macro_rules! space {
    ($scanner:ident) => {{
        $scanner.read_while($crate::util::is_space);
    }};
}

#[macro_export]
macro_rules! digits {
    ($scanner:ident) => {{
        $scanner.read_while($crate::util::is_digit)
    }};
}

#[macro_export]
macro_rules! until {
    ($scanner:expr, $byte:expr) => {{
        $scanner.read_while(|b| b != $byte)
    }};
}

#[macro_export]
macro_rules! until_newline {
    ($scanner:ident) => {{
        $scanner.read_while(|b| !$crate::util::is_newline(b))
    }};
}

#[macro_export]
macro_rules! newline {
    ($scanner:ident) => {{
        $scanner.read_while($crate::util::is_newline);
    }};
}

#[macro_export]
macro_rules! alpha {
    ($scanner:ident) => {{
        $scanner.read_while($crate::util::is_alphabetic)
    }};
}

pub use alpha;
pub use digits;
pub use newline;
pub use space;
pub use until;
pub use until_newline;
