#![no_std]
#![allow(unsafe_op_in_unsafe_fn)]

pub mod apic;
pub mod apic_defs;
pub mod fate;
pub mod hpet;
pub mod input_event;
pub mod interrupt_test;
pub mod interrupts;
pub mod ioapic;
pub mod ioapic_defs;
pub mod irq;
pub mod msi;
pub mod msix;
pub mod net;
pub mod pci;
pub mod pci_defs;
pub mod pic;
pub mod pit;
pub mod platform_init;
pub mod ps2;
pub mod random;
pub mod serial;
pub mod syscall_services_init;
pub mod tty;
pub mod virtio;
pub mod virtio_blk;
pub mod virtio_net;
pub mod xe;

pub use ps2::keyboard;
pub use ps2::mouse;

pub mod apic_timer_tests;
pub mod dns_tests;
pub mod ecam_tests;
pub mod hpet_tests;
pub mod ingress_tests;
pub mod ioapic_tests;
pub mod loopback_tests;
pub mod msix_tests;
pub mod napi_tests;
pub mod neighbor_tests;
pub mod net_types_tests;
pub mod netdev_tests;
pub mod netstack_tests;
pub mod packetbuf_tests;
pub mod pci_cap_tests;
pub mod pit_tests;
pub mod route_tests;
pub mod socket_tests;
pub mod tcp_data_tests;
pub mod tcp_tests;
pub mod timer_tests;
pub mod udp_socket_tests;
pub mod virtio_completion_tests;
pub mod virtio_msix_tests;
pub mod virtio_net_tests;
