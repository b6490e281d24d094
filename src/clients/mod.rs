pub mod vexctl;
