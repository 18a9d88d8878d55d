pub mod sections;
pub mod weeks;

pub use sections::{parse_section_pair, parse_sections};
pub use weeks::{parse_weeks, WeekSyntax};
