// ============================================================
// Layer 3 — Domain Layer
// ============================================================
// Plain Rust types that describe the image-classification
// problem: which files exist, which class each belongs to,
// and which phase (train / val) a piece of data serves.
//
// Rules for this layer:
//   - NO Burn framework types allowed here
//   - NO file I/O
//   - Only plain Rust structs, enums, and traits

// A labelled image file and the class-name ↔ label mapping
pub mod image;

// Train / validation phase marker
pub mod phase;

// Core abstractions (traits) that other layers implement
pub mod traits;
