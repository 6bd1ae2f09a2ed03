// ============================================================
// Layer 2 — Application / Use Cases
// ============================================================
// This layer orchestrates the other layers to accomplish one
// walkthrough end to end.
//
// Rules for this layer:
//   - No tensor math or model code here
//   - No printing here (that's Layer 1); results come back
//     as values the CLI renders
//   - Only workflow coordination
//
// Reference: Clean Architecture pattern
//            Rust Book §7 (Module System)

// The tensor API walkthrough
pub mod tensor_use_case;

// The transfer-learning / quantization tutorial
pub mod transfer_use_case;
