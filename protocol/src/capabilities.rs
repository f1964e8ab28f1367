//! Capability ids recognized by the gateway and the argument names they use.

pub const CLOCK_IN_TODAY: &str = "clock_in_today";
pub const QUERY_CLOCK_IN: &str = "query_clock_in";
pub const MAKE_UP_CLOCK_IN: &str = "make_up_clock_in";

/// Argument carrying a `YYYY-MM-DD` date.
pub const ARG_DATE: &str = "date";

/// Ids of the built-in capabilities, in a stable order.
pub const BUILTIN: [&str; 3] = [CLOCK_IN_TODAY, QUERY_CLOCK_IN, MAKE_UP_CLOCK_IN];
